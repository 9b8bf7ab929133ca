use burn::{
    module::{Module, Param},
    tensor::{backend::Backend, Int, Tensor},
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Linear layer holding pre-initialised weights.
///
/// Same interface as `burn::nn::Linear`, but the weights come from a seeded
/// RNG so two models built from one config are bit-identical.
#[derive(Module, Debug)]
pub struct DeterministicLinear<B: Backend> {
    /// Weight matrix of shape [output_dim, input_dim]
    pub weight: Param<Tensor<B, 2>>,
    /// Optional bias vector of shape [output_dim]
    pub bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> DeterministicLinear<B> {
    pub fn new(weight: Tensor<B, 2>, bias: Option<Tensor<B, 1>>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.weight.val().dims()[0]
    }

    /// [rows, input_dim] -> [rows, output_dim]
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = input.matmul(self.weight.val().transpose());
        match &self.bias {
            Some(bias) => output.add(bias.val().unsqueeze()),
            None => output,
        }
    }

    /// Applies the layer to the last axis of a [batch, fields, input_dim] tensor.
    pub fn forward_3d(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, fields, input_dim] = input.dims();
        let output_dim = self.output_dim();

        let output_2d = self.forward(input.reshape([batch * fields, input_dim]));
        output_2d.reshape([batch, fields, output_dim])
    }

    /// Half the squared Frobenius norm of the weight matrix (bias excluded).
    pub fn half_squared_norm(&self) -> Tensor<B, 1> {
        self.weight.val().powf_scalar(2.0).sum().div_scalar(2.0)
    }
}

/// Embedding table holding pre-initialised weights.
#[derive(Module, Debug)]
pub struct DeterministicEmbedding<B: Backend> {
    /// Embedding weight matrix of shape [vocab_size, embedding_dim]
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> DeterministicEmbedding<B> {
    pub fn new(weight: Tensor<B, 2>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.val().dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.val().dims()[1]
    }

    /// Gathers rows for a [batch, fields] index tensor -> [batch, fields, dim].
    pub fn forward_2d(&self, indices: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch, fields] = indices.dims();
        let embedding_dim = self.embedding_dim();

        if batch == 0 || fields == 0 {
            return Tensor::zeros([batch, fields, embedding_dim], &self.weight.device());
        }

        let indices_flat = indices.flatten::<1>(0, 1);
        self.weight
            .val()
            .select(0, indices_flat)
            .reshape([batch, fields, embedding_dim])
    }
}

/// Seeded source of every random parameter in the model.
///
/// SEED OFFSET POLICY (relative to `seed`):
/// - +100 series: deep branch layers (+100 + i), deep output (+150)
/// - +200: embedding table
/// - +300: prediction projection
/// - +1000 * (layer + 1): block layer; shared weights at +900/+901,
///   per-field weights at +10 * field (+0 value, +1 residual)
/// - +1000 + global_step: dropout masks of one training step
///
/// Every component seeds its own `StdRng` from this schedule. Nothing reads a
/// global or entropy-seeded RNG.
#[derive(Debug, Clone)]
pub struct DeterministicRngContext<B: Backend> {
    pub seed: u64,
    device: B::Device,
}

impl<B: Backend> DeterministicRngContext<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// RNG seeded with `seed + offset`.
    pub fn rng_at(&self, offset: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(offset))
    }

    /// Linear layer with Glorot-normal weights and N(0, 0.01) bias.
    pub fn create_deterministic_linear(
        &self,
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        offset: u64,
    ) -> DeterministicLinear<B> {
        let std = (2.0 / (input_dim + output_dim) as f32).sqrt();
        self.create_linear_with_std(input_dim, output_dim, bias, std, offset)
    }

    /// Linear layer with weights drawn from N(0, std) and bias from N(0, 0.01).
    pub fn create_linear_with_std(
        &self,
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        std: f32,
        offset: u64,
    ) -> DeterministicLinear<B> {
        let mut rng = self.rng_at(offset);
        let weight = self.generate_normal_tensor([output_dim, input_dim], &mut rng, 0.0, std);
        let bias = bias.then(|| self.generate_normal_tensor([output_dim], &mut rng, 0.0, 0.01));
        DeterministicLinear::new(weight, bias)
    }

    pub fn create_deterministic_embedding(
        &self,
        vocab_size: usize,
        embedding_dim: usize,
        std: f32,
        offset: u64,
    ) -> DeterministicEmbedding<B> {
        let mut rng = self.rng_at(offset);
        let weight = self.generate_normal_tensor([vocab_size, embedding_dim], &mut rng, 0.0, std);
        DeterministicEmbedding::new(weight)
    }

    /// LayerNorm needs no randomness; it is built here so every layer comes
    /// from the same context.
    pub fn create_deterministic_layer_norm(&self, d_model: usize, eps: f64) -> burn::nn::LayerNorm<B> {
        burn::nn::LayerNormConfig::new(d_model)
            .with_epsilon(eps)
            .init(&self.device)
    }

    /// N(mean, std) tensor on the context device. A non-positive `std`
    /// yields a constant `mean` tensor.
    pub fn generate_normal_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        mean: f32,
        std: f32,
    ) -> Tensor<B, D> {
        let total_elements: usize = shape.iter().product();
        let data: Vec<f32> = match Normal::new(mean, std) {
            Ok(normal) if std > 0.0 => (0..total_elements).map(|_| normal.sample(rng)).collect(),
            _ => vec![mean; total_elements],
        };

        Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape(shape)
    }
}
