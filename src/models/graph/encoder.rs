//! Graph classifier with densely connected graph-attention layers
//!
//! Despite the name, nothing here is video specific: it maps a batch of
//! graphs (node features + edge index) to one logit vector per graph.

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};
use tracing::debug;

use super::gat::{GatConfig, GatConv};
use crate::config::VideoEncoderConfig;

const FC_WIDTHS: [usize; 3] = [256, 32, 32];

#[derive(Debug, Clone)]
pub struct VideoEncoder {
    conv1: GatConv,
    conv2: GatConv,
    conv3: GatConv,
    fc: Vec<Linear>,
    config: VideoEncoderConfig,
}

impl VideoEncoder {
    pub fn new(vb: VarBuilder, config: &VideoEncoderConfig) -> Result<Self> {
        config.validate()?;
        let (in_ch, hidden) = (config.in_channels, config.hidden_dim);
        let gat = GatConfig::default();

        let conv1 = GatConv::new(in_ch, hidden, gat, vb.pp("conv1"))?;
        let conv2 = GatConv::new(hidden, hidden, gat, vb.pp("conv2"))?;
        let conv3 = GatConv::new(in_ch + hidden, hidden, gat, vb.pp("conv3"))?;

        // Linear layers sit at even indices of the reference nn.Sequential, ReLUs in between.
        let mut fc = Vec::with_capacity(FC_WIDTHS.len() + 1);
        let mut width = config.feature_dim();
        for (i, &out) in FC_WIDTHS.iter().chain([config.num_classes].iter()).enumerate() {
            fc.push(candle_nn::linear(width, out, vb.pp("fc").pp(2 * i))?);
            width = out;
        }

        Ok(Self {
            conv1,
            conv2,
            conv3,
            fc,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &VideoEncoderConfig {
        &self.config
    }

    /// Per-node features `[x0, x1, x2, x3]` of one graph, (N, in + 3 * hidden)
    pub fn forward_one_base(
        &self,
        node_features: &Tensor,
        edge_indices: &Tensor,
    ) -> Result<Tensor> {
        if node_features.rank() != 2 || node_features.dim(1)? != self.config.in_channels {
            candle_core::bail!(
                "node features must be (num_nodes, {}), got {:?}",
                self.config.in_channels,
                node_features.dims()
            )
        }
        if edge_indices.rank() != 2 || edge_indices.dim(0)? != 2 {
            candle_core::bail!(
                "edge indices must be (2, num_edges), got {:?}",
                edge_indices.dims()
            )
        }

        let x0 = node_features;
        let x1 = self.conv1.forward(x0, edge_indices)?;
        let x2 = self.conv2.forward(&x1, edge_indices)?;
        let x0_x2 = Tensor::cat(&[x0, &x2], D::Minus1)?;
        let x3 = self.conv3.forward(&x0_x2, edge_indices)?;

        Tensor::cat(&[x0, &x1, &x2, &x3], D::Minus1)
    }

    /// Mean of the per-node features of one graph, (in + 3 * hidden)
    pub fn readout(&self, node_features: &Tensor, edge_indices: &Tensor) -> Result<Tensor> {
        if node_features.dim(0)? == 0 {
            candle_core::bail!("cannot pool a graph without nodes")
        }
        self.forward_one_base(node_features, edge_indices)?.mean(0)
    }

    /// Classification head on pooled features (B, in + 3 * hidden) -> (B, num_classes)
    pub fn classify(&self, features: &Tensor) -> Result<Tensor> {
        let last = self.fc.len() - 1;
        let mut x = features.clone();
        for (i, linear) in self.fc.iter().enumerate() {
            x = linear.forward(&x)?;
            if i < last {
                x = x.relu()?;
            }
        }
        Ok(x)
    }

    /// Logits for a batch of graphs, one row per graph in input order.
    ///
    /// Graphs are pooled one at a time, so node and edge counts may differ
    /// within the batch.
    pub fn forward(
        &self,
        batch_node_features: &[Tensor],
        batch_edge_indices: &[Tensor],
    ) -> Result<Tensor> {
        if batch_node_features.len() != batch_edge_indices.len() {
            candle_core::bail!(
                "got {} node feature tensors but {} edge index tensors",
                batch_node_features.len(),
                batch_edge_indices.len()
            )
        }
        if batch_node_features.is_empty() {
            candle_core::bail!("empty graph batch")
        }

        let pooled = batch_node_features
            .iter()
            .zip(batch_edge_indices)
            .map(|(x, edges)| self.readout(x, edges))
            .collect::<Result<Vec<_>>>()?;
        let features = Tensor::stack(&pooled, 0)?;
        debug!("graph readout: {:?}", features.dims());

        self.classify(&features)
    }
}
