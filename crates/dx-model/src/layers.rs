use dx_core::error::XaiError;
use ndarray::{Array1, Array3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Valeur circulant entre deux couches.
#[derive(Clone, Debug, PartialEq)]
pub enum Tensor {
    /// Feature map (height, width, channels).
    Spatial(Array3<f32>),
    /// Vector (after global pooling or dense layers).
    Flat(Array1<f32>),
}

impl Tensor {
    /// Shape descriptor.
    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Self::Spatial(a) => {
                let (h, w, c) = a.dim();
                Shape::Spatial(h, w, c)
            }
            Self::Flat(v) => Shape::Flat(v.len()),
        }
    }

    /// True when every element is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Spatial(a) => a.iter().all(|v| v.is_finite()),
            Self::Flat(v) => v.iter().all(|v| v.is_finite()),
        }
    }
}

/// Forme d'un tenseur, sans les données.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// (height, width, channels).
    Spatial(usize, usize, usize),
    /// Vector length.
    Flat(usize),
}

/// 2-D convolution, "same" padding, optional fused ReLU.
///
/// Weights are laid out `[out_ch][ky][kx][in_ch]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conv2d {
    /// Layer name.
    pub name: String,
    /// Input channels.
    pub in_ch: usize,
    /// Output channels.
    pub out_ch: usize,
    /// Square kernel side.
    pub kernel: usize,
    /// Stride on both axes.
    pub stride: usize,
    /// Apply ReLU to the output.
    pub relu: bool,
    /// Kernel weights.
    pub weights: Vec<f32>,
    /// One bias per output channel.
    pub bias: Vec<f32>,
}

/// Fully connected layer. Weights are laid out `[outputs][inputs]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dense {
    /// Layer name.
    pub name: String,
    /// Input length.
    pub inputs: usize,
    /// Output length.
    pub outputs: usize,
    /// Weight matrix.
    pub weights: Vec<f32>,
    /// One bias per output.
    pub bias: Vec<f32>,
}

/// Couche du réseau. Chaque couche a un nom unique.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Layer {
    /// See [`Conv2d`].
    Conv2d(Conv2d),
    /// Non-overlapping max pooling (`size × size`, stride `size`).
    MaxPool {
        /// Layer name.
        name: String,
        /// Window side.
        size: usize,
    },
    /// Spatial mean per channel.
    GlobalAvgPool {
        /// Layer name.
        name: String,
    },
    /// See [`Dense`].
    Dense(Dense),
    /// Softmax over a vector.
    Softmax {
        /// Layer name.
        name: String,
    },
}

/// Output size and leading padding of a "same" convolution along one axis.
fn same_geometry(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = input.div_ceil(stride);
    let pad_total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(input);
    (out, pad_total / 2)
}

fn shape_error(layer: &str, msg: impl std::fmt::Display) -> XaiError {
    XaiError::ModelUnavailable(format!("layer '{layer}': {msg}"))
}

impl Layer {
    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Conv2d(c) => &c.name,
            Self::Dense(d) => &d.name,
            Self::MaxPool { name, .. } | Self::GlobalAvgPool { name } | Self::Softmax { name } => {
                name
            }
        }
    }

    /// Number of trainable parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        match self {
            Self::Conv2d(c) => c.weights.len() + c.bias.len(),
            Self::Dense(d) => d.weights.len() + d.bias.len(),
            _ => 0,
        }
    }

    /// Output shape for a given input shape.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` if the layer cannot take `input`
    /// or its parameters have the wrong length.
    pub fn output_shape(&self, input: Shape) -> Result<Shape, XaiError> {
        match (self, input) {
            (Self::Conv2d(c), Shape::Spatial(h, w, ch)) => {
                if ch != c.in_ch {
                    return Err(shape_error(
                        &c.name,
                        format!("expects {} channels, got {ch}", c.in_ch),
                    ));
                }
                if c.kernel == 0 || c.stride == 0 {
                    return Err(shape_error(&c.name, "zero kernel or stride"));
                }
                if c.weights.len() != c.out_ch * c.kernel * c.kernel * c.in_ch
                    || c.bias.len() != c.out_ch
                {
                    return Err(shape_error(&c.name, "parameter count mismatch"));
                }
                let (oh, _) = same_geometry(h, c.kernel, c.stride);
                let (ow, _) = same_geometry(w, c.kernel, c.stride);
                Ok(Shape::Spatial(oh, ow, c.out_ch))
            }
            (Self::MaxPool { name, size }, Shape::Spatial(h, w, ch)) => {
                if *size == 0 || h < *size || w < *size {
                    return Err(shape_error(name, format!("cannot pool {h}×{w} by {size}")));
                }
                Ok(Shape::Spatial(h / size, w / size, ch))
            }
            (Self::GlobalAvgPool { .. }, Shape::Spatial(_, _, ch)) => Ok(Shape::Flat(ch)),
            (Self::Dense(d), Shape::Flat(n)) => {
                if n != d.inputs {
                    return Err(shape_error(
                        &d.name,
                        format!("expects {} inputs, got {n}", d.inputs),
                    ));
                }
                if d.weights.len() != d.inputs * d.outputs || d.bias.len() != d.outputs {
                    return Err(shape_error(&d.name, "parameter count mismatch"));
                }
                Ok(Shape::Flat(d.outputs))
            }
            (Self::Softmax { .. }, Shape::Flat(n)) => Ok(Shape::Flat(n)),
            (layer, shape) => Err(shape_error(
                layer.name(),
                format!("cannot take input of shape {shape:?}"),
            )),
        }
    }

    /// Forward pass.
    ///
    /// # Errors
    /// Returns `XaiError::ModelUnavailable` on a shape mismatch.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, XaiError> {
        self.output_shape(input.shape())?;
        match (self, input) {
            (Self::Conv2d(c), Tensor::Spatial(x)) => conv_forward(c, x).map(Tensor::Spatial),
            (Self::MaxPool { name, size }, Tensor::Spatial(x)) => {
                maxpool_forward(name, *size, x).map(Tensor::Spatial)
            }
            (Self::GlobalAvgPool { .. }, Tensor::Spatial(x)) => {
                let (h, w, ch) = x.dim();
                let n = (h * w).max(1) as f32;
                let mut out = Array1::<f32>::zeros(ch);
                let xs = contiguous(x);
                for px in xs.chunks_exact(ch.max(1)) {
                    for (o, &v) in out.iter_mut().zip(px) {
                        *o += v;
                    }
                }
                out.mapv_inplace(|v| v / n);
                Ok(Tensor::Flat(out))
            }
            (Self::Dense(d), Tensor::Flat(x)) => {
                let out: Array1<f32> = (0..d.outputs)
                    .map(|o| {
                        let row = &d.weights[o * d.inputs..(o + 1) * d.inputs];
                        d.bias[o] + row.iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f32>()
                    })
                    .collect();
                Ok(Tensor::Flat(out))
            }
            (Self::Softmax { .. }, Tensor::Flat(x)) => Ok(Tensor::Flat(softmax(x))),
            (layer, t) => Err(shape_error(
                layer.name(),
                format!("cannot take input of shape {:?}", t.shape()),
            )),
        }
    }

    /// Gradient w.r.t. the layer input, given the gradient w.r.t. its output.
    ///
    /// `input` and `output` are the tensors of the forward pass.
    ///
    /// # Errors
    /// Returns `XaiError::GradientUnavailable` if the tensors do not match
    /// this layer.
    pub fn backward(
        &self,
        input: &Tensor,
        output: &Tensor,
        grad_out: &Tensor,
    ) -> Result<Tensor, XaiError> {
        match (self, input, output, grad_out) {
            (Self::Conv2d(c), Tensor::Spatial(x), Tensor::Spatial(y), Tensor::Spatial(g)) => {
                conv_backward(c, x, y, g).map(Tensor::Spatial)
            }
            (
                Self::MaxPool { size, .. },
                Tensor::Spatial(x),
                Tensor::Spatial(_),
                Tensor::Spatial(g),
            ) => Ok(Tensor::Spatial(maxpool_backward(*size, x, g))),
            (Self::GlobalAvgPool { .. }, Tensor::Spatial(x), _, Tensor::Flat(g)) => {
                let (h, w, ch) = x.dim();
                let n = (h * w).max(1) as f32;
                Ok(Tensor::Spatial(Array3::from_shape_fn((h, w, ch), |(_, _, c)| {
                    g[c] / n
                })))
            }
            (Self::Dense(d), Tensor::Flat(_), _, Tensor::Flat(g)) => {
                let mut grad = Array1::<f32>::zeros(d.inputs);
                for (o, &go) in g.iter().enumerate() {
                    let row = &d.weights[o * d.inputs..(o + 1) * d.inputs];
                    for (gi, &w) in grad.iter_mut().zip(row) {
                        *gi += go * w;
                    }
                }
                Ok(Tensor::Flat(grad))
            }
            (Self::Softmax { .. }, _, Tensor::Flat(p), Tensor::Flat(g)) => {
                let dot: f32 = p.iter().zip(g.iter()).map(|(p, g)| p * g).sum();
                Ok(Tensor::Flat(
                    p.iter().zip(g.iter()).map(|(&p, &g)| p * (g - dot)).collect(),
                ))
            }
            (layer, ..) => Err(XaiError::GradientUnavailable(format!(
                "layer '{}' cannot back-propagate a {:?} gradient",
                layer.name(),
                grad_out.shape()
            ))),
        }
    }
}

/// Numerically stable softmax.
///
/// # Example
/// ```
/// use dx_model::layers::softmax;
/// use ndarray::arr1;
/// let p = softmax(&arr1(&[1000.0, 1000.0]));
/// assert!((p[0] - 0.5).abs() < 1e-6);
/// ```
#[must_use]
pub fn softmax(x: &Array1<f32>) -> Array1<f32> {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    if sum > 0.0 && sum.is_finite() {
        exp / sum
    } else {
        Array1::from_elem(x.len(), 1.0 / x.len().max(1) as f32)
    }
}

fn contiguous(x: &Array3<f32>) -> std::borrow::Cow<'_, [f32]> {
    match x.as_slice() {
        Some(s) => std::borrow::Cow::Borrowed(s),
        None => std::borrow::Cow::Owned(x.iter().copied().collect()),
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn conv_forward(c: &Conv2d, x: &Array3<f32>) -> Result<Array3<f32>, XaiError> {
    let (h, w, cin) = x.dim();
    let k = c.kernel;
    let (oh, pt) = same_geometry(h, k, c.stride);
    let (ow, pl) = same_geometry(w, k, c.stride);
    let cout = c.out_ch;
    let xs = contiguous(x);

    let mut out = vec![0.0f32; oh * ow * cout];
    out.par_chunks_mut(ow * cout)
        .enumerate()
        .for_each(|(oy, row)| {
            for ox in 0..ow {
                let acc = &mut row[ox * cout..(ox + 1) * cout];
                acc.copy_from_slice(&c.bias);
                for ky in 0..k {
                    let iy = (oy * c.stride + ky) as isize - pt as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..k {
                        let ix = (ox * c.stride + kx) as isize - pl as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        let base = (iy as usize * w + ix as usize) * cin;
                        let px = &xs[base..base + cin];
                        for (co, a) in acc.iter_mut().enumerate() {
                            let wb = ((co * k + ky) * k + kx) * cin;
                            *a += dot(px, &c.weights[wb..wb + cin]);
                        }
                    }
                }
                if c.relu {
                    for a in acc.iter_mut() {
                        *a = a.max(0.0);
                    }
                }
            }
        });

    Array3::from_shape_vec((oh, ow, cout), out).map_err(|e| shape_error(&c.name, e))
}

fn conv_backward(
    c: &Conv2d,
    x: &Array3<f32>,
    y: &Array3<f32>,
    g: &Array3<f32>,
) -> Result<Array3<f32>, XaiError> {
    let (h, w, cin) = x.dim();
    let (oh, ow, cout) = y.dim();
    if g.dim() != y.dim() {
        return Err(XaiError::GradientUnavailable(format!(
            "layer '{}': gradient shape {:?} differs from output {:?}",
            c.name,
            g.dim(),
            y.dim()
        )));
    }
    let k = c.kernel;
    let s = c.stride;
    let (_, pt) = same_geometry(h, k, s);
    let (_, pl) = same_geometry(w, k, s);

    // dL/d(pre-activation): ReLU passes the gradient only where the output is positive
    let ys = contiguous(y);
    let gs = contiguous(g);
    let pre: Vec<f32> = if c.relu {
        gs.iter()
            .zip(ys.iter())
            .map(|(&g, &y)| if y > 0.0 { g } else { 0.0 })
            .collect()
    } else {
        gs.into_owned()
    };

    let mut grad = vec![0.0f32; h * w * cin];
    grad.par_chunks_mut(w * cin).enumerate().for_each(|(iy, row)| {
        for ix in 0..w {
            let gi = &mut row[ix * cin..(ix + 1) * cin];
            for ky in 0..k {
                let ny = iy as isize + pt as isize - ky as isize;
                if ny < 0 || ny % s as isize != 0 {
                    continue;
                }
                let oy = ny as usize / s;
                if oy >= oh {
                    continue;
                }
                for kx in 0..k {
                    let nx = ix as isize + pl as isize - kx as isize;
                    if nx < 0 || nx % s as isize != 0 {
                        continue;
                    }
                    let ox = nx as usize / s;
                    if ox >= ow {
                        continue;
                    }
                    let go = &pre[(oy * ow + ox) * cout..(oy * ow + ox + 1) * cout];
                    for (co, &gv) in go.iter().enumerate() {
                        if gv == 0.0 {
                            continue;
                        }
                        let wb = ((co * k + ky) * k + kx) * cin;
                        for (dst, &wv) in gi.iter_mut().zip(&c.weights[wb..wb + cin]) {
                            *dst += gv * wv;
                        }
                    }
                }
            }
        }
    });

    Array3::from_shape_vec((h, w, cin), grad).map_err(|e| {
        XaiError::GradientUnavailable(format!("layer '{}': {e}", c.name))
    })
}

fn maxpool_forward(name: &str, size: usize, x: &Array3<f32>) -> Result<Array3<f32>, XaiError> {
    let (h, w, ch) = x.dim();
    let (oh, ow) = (h / size, w / size);
    let mut out = Array3::<f32>::from_elem((oh, ow, ch), f32::NEG_INFINITY);
    for oy in 0..oh {
        for ox in 0..ow {
            for dy in 0..size {
                for dx in 0..size {
                    for c in 0..ch {
                        let v = x[[oy * size + dy, ox * size + dx, c]];
                        let o = &mut out[[oy, ox, c]];
                        if v > *o {
                            *o = v;
                        }
                    }
                }
            }
        }
    }
    if out.iter().any(|v| v.is_infinite() && *v < 0.0) {
        return Err(shape_error(name, "pooling window saw no finite value"));
    }
    Ok(out)
}

fn maxpool_backward(size: usize, x: &Array3<f32>, g: &Array3<f32>) -> Array3<f32> {
    let (h, w, ch) = x.dim();
    let (oh, ow, _) = g.dim();
    let mut grad = Array3::<f32>::zeros((h, w, ch));
    for oy in 0..oh {
        for ox in 0..ow {
            for c in 0..ch {
                // first maximum of the window receives the gradient
                let mut best = (oy * size, ox * size);
                for dy in 0..size {
                    for dx in 0..size {
                        let (yy, xx) = (oy * size + dy, ox * size + dx);
                        if x[[yy, xx, c]] > x[[best.0, best.1, c]] {
                            best = (yy, xx);
                        }
                    }
                }
                grad[[best.0, best.1, c]] += g[[oy, ox, c]];
            }
        }
    }
    grad
}
