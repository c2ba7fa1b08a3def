//! Graph attention convolution (GATv1)
//!
//! For every edge j -> i the layer scores
//! `e_ij = LeakyReLU(a_src . W x_j + a_dst . W x_i)`, normalises the scores
//! with a softmax over the edges entering i and sums `alpha_ij * W x_j`.
//! Messages flow from `edge_index[0]` (source) to `edge_index[1]` (target).

use candle_core::{D, DType, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder, init::Init};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatConfig {
    pub heads: usize,
    /// Concatenate heads (`heads * out` wide) instead of averaging them
    pub concat: bool,
    pub negative_slope: f64,
    /// Drop existing self-loops and add exactly one per node
    pub add_self_loops: bool,
    pub bias: bool,
}

impl Default for GatConfig {
    fn default() -> Self {
        Self {
            heads: 1,
            concat: true,
            negative_slope: 0.2,
            add_self_loops: true,
            bias: true,
        }
    }
}

fn glorot(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Normalised attention coefficients of one forward pass
#[derive(Debug, Clone)]
pub struct EdgeAttention {
    /// Source node of every edge actually used (self-loops included)
    pub src: Vec<u32>,
    /// Target node of every edge actually used
    pub dst: Vec<u32>,
    /// (num_edges, heads)
    pub alpha: Tensor,
}

#[derive(Debug, Clone)]
pub struct GatConv {
    lin: Linear,
    att_src: Tensor,
    att_dst: Tensor,
    bias: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
    cfg: GatConfig,
}

impl GatConv {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        cfg: GatConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        if cfg.heads == 0 {
            candle_core::bail!("GatConv needs at least one attention head")
        }
        let heads = cfg.heads;
        let weight = vb.pp("lin").get_with_hints(
            (heads * out_channels, in_channels),
            "weight",
            glorot(in_channels, heads * out_channels),
        )?;
        let lin = Linear::new(weight, None);
        let att_src =
            vb.get_with_hints((1, heads, out_channels), "att_src", glorot(heads, out_channels))?;
        let att_dst =
            vb.get_with_hints((1, heads, out_channels), "att_dst", glorot(heads, out_channels))?;
        let bias = if cfg.bias {
            let width = if cfg.concat {
                heads * out_channels
            } else {
                out_channels
            };
            Some(vb.get_with_hints(width, "bias", Init::Const(0.))?)
        } else {
            None
        };

        Ok(Self {
            lin,
            att_src,
            att_dst,
            bias,
            in_channels,
            out_channels,
            cfg,
        })
    }

    /// Width of the layer output
    pub fn output_dim(&self) -> usize {
        if self.cfg.concat {
            self.cfg.heads * self.out_channels
        } else {
            self.out_channels
        }
    }

    /// Validate an edge index against `num_nodes` and apply the self-loop policy
    fn edge_lists(&self, edge_index: &Tensor, num_nodes: usize) -> Result<(Vec<u32>, Vec<u32>)> {
        let (rows, _) = edge_index.dims2()?;
        if rows != 2 {
            candle_core::bail!("edge index must have 2 rows, got {}", rows)
        }
        if edge_index.dtype().is_float() {
            candle_core::bail!("edge index must be integral, got {:?}", edge_index.dtype())
        }
        let pairs = edge_index.to_dtype(DType::I64)?.to_vec2::<i64>()?;

        let mut src = Vec::with_capacity(pairs[0].len() + num_nodes);
        let mut dst = Vec::with_capacity(pairs[0].len() + num_nodes);
        for (&s, &d) in pairs[0].iter().zip(pairs[1].iter()) {
            if s < 0 || d < 0 || s as usize >= num_nodes || d as usize >= num_nodes {
                candle_core::bail!("edge ({}, {}) out of range for {} nodes", s, d, num_nodes)
            }
            if self.cfg.add_self_loops && s == d {
                continue;
            }
            src.push(s as u32);
            dst.push(d as u32);
        }
        if self.cfg.add_self_loops {
            for i in 0..num_nodes as u32 {
                src.push(i);
                dst.push(i);
            }
        }
        Ok((src, dst))
    }

    /// Softmax of `scores` (E, H) over edges sharing a target node.
    ///
    /// The per-target maximum is computed on the host and enters the graph as
    /// a constant.
    fn segment_softmax(
        scores: &Tensor,
        dst: &[u32],
        dst_t: &Tensor,
        num_nodes: usize,
    ) -> Result<Tensor> {
        let heads = scores.dim(1)?;
        let rows = scores.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let mut max = vec![f32::NEG_INFINITY; num_nodes * heads];
        for (row, &target) in rows.iter().zip(dst) {
            let base = target as usize * heads;
            for (h, &v) in row.iter().enumerate() {
                max[base + h] = max[base + h].max(v);
            }
        }
        for m in max.iter_mut().filter(|m| !m.is_finite()) {
            *m = 0.0;
        }

        let device = scores.device();
        let max = Tensor::from_vec(max, (num_nodes, heads), device)?.to_dtype(scores.dtype())?;
        let exp = (scores - max.index_select(dst_t, 0)?)?.exp()?;
        let denom = Tensor::zeros((num_nodes, heads), scores.dtype(), device)?
            .index_add(dst_t, &exp, 0)?;
        exp / (denom.index_select(dst_t, 0)? + 1e-16)?
    }

    pub fn forward_with_attention(
        &self,
        x: &Tensor,
        edge_index: &Tensor,
    ) -> Result<(Tensor, EdgeAttention)> {
        let (num_nodes, in_dim) = x.dims2()?;
        if in_dim != self.in_channels {
            candle_core::bail!(
                "GatConv expects {} input channels, got {}",
                self.in_channels,
                in_dim
            )
        }
        let (heads, out) = (self.cfg.heads, self.out_channels);
        let device = x.device();

        let (src, dst) = self.edge_lists(edge_index, num_nodes)?;
        let num_edges = src.len();
        let src_t = Tensor::from_vec(src.clone(), num_edges, device)?;
        let dst_t = Tensor::from_vec(dst.clone(), num_edges, device)?;

        let h = self.lin.forward(x)?.reshape((num_nodes, heads, out))?;

        let (aggregated, alpha) = if num_edges == 0 {
            let alpha = Tensor::zeros((0, heads), x.dtype(), device)?;
            (Tensor::zeros((num_nodes, heads, out), x.dtype(), device)?, alpha)
        } else {
            let alpha_src = h.broadcast_mul(&self.att_src)?.sum(D::Minus1)?;
            let alpha_dst = h.broadcast_mul(&self.att_dst)?.sum(D::Minus1)?;
            let scores =
                (alpha_src.index_select(&src_t, 0)? + alpha_dst.index_select(&dst_t, 0)?)?;
            let scores = candle_nn::ops::leaky_relu(&scores, self.cfg.negative_slope)?;
            let alpha = Self::segment_softmax(&scores, &dst, &dst_t, num_nodes)?;

            let messages = h
                .index_select(&src_t, 0)?
                .broadcast_mul(&alpha.unsqueeze(D::Minus1)?)?;
            let aggregated = Tensor::zeros((num_nodes, heads, out), x.dtype(), device)?
                .index_add(&dst_t, &messages, 0)?;
            (aggregated, alpha)
        };

        let out = if self.cfg.concat {
            aggregated.reshape((num_nodes, heads * out))?
        } else {
            aggregated.mean(1)?
        };
        let out = match &self.bias {
            Some(bias) => out.broadcast_add(bias)?,
            None => out,
        };
        Ok((out, EdgeAttention { src, dst, alpha }))
    }

    /// (N, in) node features, (2, E) edge index -> (N, output_dim)
    pub fn forward(&self, x: &Tensor, edge_index: &Tensor) -> Result<Tensor> {
        Ok(self.forward_with_attention(x, edge_index)?.0)
    }
}
