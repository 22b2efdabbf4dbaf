use burn::module::AutodiffModule;
use burn::optim::{Optimizer, RmsPropConfig};
use burn::tensor::backend::AutodiffBackend;

pub const RMSPROP_DECAY: f32 = 0.9;
pub const RMSPROP_EPSILON: f32 = 1e-7;

/// Plain RMSProp: moving average of squared gradients with decay 0.9, no
/// momentum, not centred.
pub fn rmsprop<B, M>() -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    RmsPropConfig::new()
        .with_alpha(RMSPROP_DECAY)
        .with_epsilon(RMSPROP_EPSILON)
        .with_momentum(0.0)
        .with_centered(false)
        .init::<B, M>()
}
