use burn::prelude::{Backend, Tensor};
use burn::tensor::activation;

/// Elementwise non-linearity applied between layers. Gradients come from the
/// autodiff backend, so only the forward pass is needed.
pub trait Activation<const D: usize, B: Backend> {
    fn forward(tensor: Tensor<B, D>) -> Tensor<B, D>;
}

pub struct ReLU;

impl<const D: usize, B: Backend> Activation<D, B> for ReLU {
    fn forward(tensor: Tensor<B, D>) -> Tensor<B, D> {
        activation::relu(tensor)
    }
}

pub struct Sigmoid;

impl<const D: usize, B: Backend> Activation<D, B> for Sigmoid {
    fn forward(tensor: Tensor<B, D>) -> Tensor<B, D> {
        activation::sigmoid(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn relu_zeroes_negatives() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1>::from_data(
            TensorData::new(vec![-2.0f32, 0.0, 3.5], [3]),
            &device,
        );
        let output = <ReLU as Activation<1, TestBackend>>::forward(input);
        assert_eq!(output.into_data().to_vec::<f32>().unwrap(), vec![0.0, 0.0, 3.5]);
    }

    #[test]
    fn sigmoid_is_half_at_zero() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 1>::from_data(TensorData::new(vec![0.0f32, 50.0], [2]), &device);
        let output = <Sigmoid as Activation<1, TestBackend>>::forward(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        approx::assert_relative_eq!(output[0], 0.5, epsilon = 1e-6);
        approx::assert_relative_eq!(output[1], 1.0, epsilon = 1e-6);
    }
}
