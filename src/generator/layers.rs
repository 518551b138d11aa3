//! Inference-only building blocks for the U-Net: strided convolutions via
//! im2col + GEMM, transposed convolutions via GEMM + col2im, batch norm with
//! running statistics, and the pointwise activations.
//!
//! All tensors are channels-first `[C, H, W]` with an implicit batch of one.

use ndarray::linalg::general_mat_mul;
use ndarray::parallel::prelude::*;
use ndarray::{concatenate, Array1, Array2, Array3, ArrayD, ArrayView2, Axis, Ix4};
use rand::Rng;

use crate::error::{Result, SketchError};

fn rows_per_task(rows: usize) -> usize {
	(rows / rayon::current_num_threads().max(1)).max(1)
}

/// `lhs * rhs`, splitting the rows of `lhs` across the rayon pool.
fn matmul(lhs: ArrayView2<f32>, rhs: ArrayView2<f32>) -> Array2<f32> {
	let mut out = Array2::<f32>::zeros((lhs.nrows(), rhs.ncols()));
	let chunk = rows_per_task(lhs.nrows());
	out.axis_chunks_iter_mut(Axis(0), chunk)
		.into_par_iter()
		.zip(lhs.axis_chunks_iter(Axis(0), chunk).into_par_iter())
		.for_each(|(mut dst, src)| general_mat_mul(1.0, &src, &rhs, 0.0, &mut dst));
	out
}

fn output_extent(input: usize, kernel: usize, stride: usize, padding: usize) -> Result<usize> {
	if input + 2 * padding < kernel {
		return Err(SketchError::Shape(format!(
			"Input extent {} is smaller than kernel {} with padding {}",
			input, kernel, padding
		)));
	}
	Ok((input + 2 * padding - kernel) / stride + 1)
}

#[derive(Debug, Clone)]
pub struct Conv2d {
	/// `[out, in * k * k]`
	weight: Array2<f32>,
	bias: Option<Array1<f32>>,
	in_channels: usize,
	kernel: usize,
	stride: usize,
	padding: usize,
}

impl Conv2d {
	/// `weight` has PyTorch layout `[out, in, k, k]`.
	pub fn new(weight: &ArrayD<f32>, bias: Option<&ArrayD<f32>>, stride: usize, padding: usize) -> Result<Self> {
		let weight = weight.view().into_dimensionality::<Ix4>()?;
		let (out_channels, in_channels, kh, kw) = weight.dim();
		if kh != kw {
			return Err(SketchError::Shape(format!("Non-square kernel {}x{}", kh, kw)));
		}
		let matrix = weight
			.as_standard_layout()
			.into_owned()
			.into_shape((out_channels, in_channels * kh * kw))?;
		Ok(Self {
			weight: matrix,
			bias: bias.map(|b| flatten_vector(b, out_channels)).transpose()?,
			in_channels,
			kernel: kh,
			stride,
			padding,
		})
	}

	pub fn out_channels(&self) -> usize {
		self.weight.nrows()
	}

	pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>> {
		let (channels, height, width) = input.dim();
		if channels != self.in_channels {
			return Err(SketchError::Shape(format!(
				"Conv expects {} input channels, got {}",
				self.in_channels, channels
			)));
		}
		let out_h = output_extent(height, self.kernel, self.stride, self.padding)?;
		let out_w = output_extent(width, self.kernel, self.stride, self.padding)?;

		let cols = self.im2col(input, out_h, out_w);
		let mut out = matmul(self.weight.view(), cols.view());
		if let Some(ref bias) = self.bias {
			out += &bias.view().insert_axis(Axis(1));
		}
		Ok(out.into_shape((self.out_channels(), out_h, out_w))?)
	}

	fn im2col(&self, input: &Array3<f32>, out_h: usize, out_w: usize) -> Array2<f32> {
		let (_, height, width) = input.dim();
		let k = self.kernel;
		let (stride, padding) = (self.stride as isize, self.padding as isize);
		let mut cols = Array2::<f32>::zeros((self.in_channels * k * k, out_h * out_w));

		cols.axis_iter_mut(Axis(0))
			.into_par_iter()
			.enumerate()
			.for_each(|(row, mut line)| {
				let channel = row / (k * k);
				let ky = ((row / k) % k) as isize;
				let kx = (row % k) as isize;
				for oy in 0..out_h {
					let iy = oy as isize * stride + ky - padding;
					if iy < 0 || iy >= height as isize {
						continue;
					}
					for ox in 0..out_w {
						let ix = ox as isize * stride + kx - padding;
						if ix < 0 || ix >= width as isize {
							continue;
						}
						line[oy * out_w + ox] = input[[channel, iy as usize, ix as usize]];
					}
				}
			});
		cols
	}
}

#[derive(Debug, Clone)]
pub struct ConvTranspose2d {
	/// `[in, out * k * k]`
	weight: Array2<f32>,
	bias: Option<Array1<f32>>,
	out_channels: usize,
	kernel: usize,
	stride: usize,
	padding: usize,
}

impl ConvTranspose2d {
	/// `weight` has PyTorch layout `[in, out, k, k]`.
	pub fn new(weight: &ArrayD<f32>, bias: Option<&ArrayD<f32>>, stride: usize, padding: usize) -> Result<Self> {
		let weight = weight.view().into_dimensionality::<Ix4>()?;
		let (in_channels, out_channels, kh, kw) = weight.dim();
		if kh != kw {
			return Err(SketchError::Shape(format!("Non-square kernel {}x{}", kh, kw)));
		}
		let matrix = weight
			.as_standard_layout()
			.into_owned()
			.into_shape((in_channels, out_channels * kh * kw))?;
		Ok(Self {
			weight: matrix,
			bias: bias.map(|b| flatten_vector(b, out_channels)).transpose()?,
			out_channels,
			kernel: kh,
			stride,
			padding,
		})
	}

	pub fn in_channels(&self) -> usize {
		self.weight.nrows()
	}

	pub fn out_channels(&self) -> usize {
		self.out_channels
	}

	pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>> {
		let (channels, height, width) = input.dim();
		if channels != self.in_channels() {
			return Err(SketchError::Shape(format!(
				"Transposed conv expects {} input channels, got {}",
				self.in_channels(),
				channels
			)));
		}
		let out_h = ((height - 1) * self.stride + self.kernel)
			.checked_sub(2 * self.padding)
			.ok_or_else(|| SketchError::Shape("Transposed conv output would be empty".into()))?;
		let out_w = ((width - 1) * self.stride + self.kernel)
			.checked_sub(2 * self.padding)
			.ok_or_else(|| SketchError::Shape("Transposed conv output would be empty".into()))?;

		let flat = input.view().into_shape((channels, height * width))?;
		let cols = matmul(self.weight.t(), flat);
		Ok(self.col2im(&cols, height, width, out_h, out_w))
	}

	fn col2im(&self, cols: &Array2<f32>, height: usize, width: usize, out_h: usize, out_w: usize) -> Array3<f32> {
		let k = self.kernel;
		let (stride, padding) = (self.stride as isize, self.padding as isize);
		let mut out = Array3::<f32>::zeros((self.out_channels, out_h, out_w));

		out.axis_iter_mut(Axis(0))
			.into_par_iter()
			.enumerate()
			.for_each(|(channel, mut plane)| {
				for ky in 0..k {
					for kx in 0..k {
						let line = cols.row(channel * k * k + ky * k + kx);
						for iy in 0..height {
							let oy = iy as isize * stride + ky as isize - padding;
							if oy < 0 || oy >= out_h as isize {
								continue;
							}
							for ix in 0..width {
								let ox = ix as isize * stride + kx as isize - padding;
								if ox < 0 || ox >= out_w as isize {
									continue;
								}
								plane[[oy as usize, ox as usize]] += line[iy * width + ix];
							}
						}
					}
				}
				if let Some(ref bias) = self.bias {
					let b = bias[channel];
					plane.mapv_inplace(|v| v + b);
				}
			});
		out
	}
}

/// Batch norm folded into a per-channel affine transform.
#[derive(Debug, Clone)]
pub struct BatchNorm {
	scale: Array1<f32>,
	shift: Array1<f32>,
}

impl BatchNorm {
	pub fn new(
		gamma: &ArrayD<f32>,
		beta: &ArrayD<f32>,
		running_mean: &ArrayD<f32>,
		running_var: &ArrayD<f32>,
		epsilon: f32,
	) -> Result<Self> {
		let channels = gamma.len();
		let gamma = flatten_vector(gamma, channels)?;
		let beta = flatten_vector(beta, channels)?;
		let mean = flatten_vector(running_mean, channels)?;
		let var = flatten_vector(running_var, channels)?;

		let scale = &gamma / &var.mapv(|v| (v + epsilon).sqrt());
		let shift = &beta - &(&mean * &scale);
		Ok(Self { scale, shift })
	}

	pub fn apply(&self, x: &mut Array3<f32>) -> Result<()> {
		if x.dim().0 != self.scale.len() {
			return Err(SketchError::Shape(format!(
				"Batch norm over {} channels applied to {}",
				self.scale.len(),
				x.dim().0
			)));
		}
		for ((mut plane, &scale), &shift) in x.axis_iter_mut(Axis(0)).zip(self.scale.iter()).zip(self.shift.iter()) {
			plane.mapv_inplace(|v| v * scale + shift);
		}
		Ok(())
	}
}

fn flatten_vector(tensor: &ArrayD<f32>, expected: usize) -> Result<Array1<f32>> {
	if tensor.len() != expected {
		return Err(SketchError::Shape(format!(
			"Expected a vector of length {}, got shape {:?}",
			expected,
			tensor.shape()
		)));
	}
	Ok(tensor.iter().cloned().collect())
}

pub fn leaky_relu(x: &mut Array3<f32>, slope: f32) {
	x.mapv_inplace(|v| if v >= 0.0 { v } else { v * slope });
}

pub fn relu(x: &mut Array3<f32>) {
	x.mapv_inplace(|v| v.max(0.0));
}

pub fn tanh(x: &mut Array3<f32>) {
	x.mapv_inplace(f32::tanh);
}

pub fn mapped_tanh(x: &mut Array3<f32>) {
	x.mapv_inplace(|v| (v.tanh() + 1.0) / 2.0);
}

/// Zeroes each element with probability `p` and rescales survivors by `1 / (1 - p)`.
pub fn dropout<R: Rng + ?Sized>(x: &mut Array3<f32>, p: f32, rng: &mut R) {
	if p <= 0.0 {
		return;
	}
	let keep = 1.0 / (1.0 - p);
	x.mapv_inplace(|v| if rng.gen::<f32>() < p { 0.0 } else { v * keep });
}

/// Concatenates along the channel axis, `first` before `second`.
pub fn concat_channels(first: &Array3<f32>, second: &Array3<f32>) -> Result<Array3<f32>> {
	Ok(concatenate(Axis(0), &[first.view(), second.view()])?)
}
