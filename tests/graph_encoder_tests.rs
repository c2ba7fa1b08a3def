//! Tests for the graph-attention classifier

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_video_gen::{GatConfig, GatConv, VideoEncoder, VideoEncoderConfig};

// ===========================================================================
// Test Helpers
// ===========================================================================

fn small_config() -> VideoEncoderConfig {
    VideoEncoderConfig::new(3, 16, 4)
}

fn build(config: &VideoEncoderConfig) -> Result<(VarMap, VideoEncoder)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let encoder = VideoEncoder::new(vb, config)?;
    Ok((varmap, encoder))
}

/// Random features on a chain 0 -> 1 -> ... -> n-1
fn chain_graph(num_nodes: usize, channels: usize) -> Result<(Tensor, Tensor)> {
    let x = Tensor::randn(0f32, 1.0, (num_nodes, channels), &Device::Cpu)?;
    let src: Vec<i64> = (0..num_nodes as i64 - 1).collect();
    let dst: Vec<i64> = (1..num_nodes as i64).collect();
    let edges = Tensor::new(vec![src, dst].concat(), &Device::Cpu)?.reshape((2, num_nodes - 1))?;
    Ok((x, edges))
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    (a - b)?.abs()?.max_all()?.to_scalar::<f32>()
}

// ===========================================================================
// Per-graph features
// ===========================================================================

#[test]
fn test_forward_one_base_concatenates_layers() -> Result<()> {
    let config = small_config();
    let (_varmap, encoder) = build(&config)?;
    let (x, edges) = chain_graph(6, 3)?;

    let features = encoder.forward_one_base(&x, &edges)?;

    assert_eq!(features.dims(), &[6, 3 + 3 * 16]);
    assert_eq!(config.feature_dim(), 51);
    // The first columns are the raw node features.
    assert_eq!(max_abs_diff(&features.narrow(1, 0, 3)?, &x)?, 0.0);
    Ok(())
}

#[test]
fn test_default_feature_width() -> Result<()> {
    let (_varmap, encoder) = build(&VideoEncoderConfig::default())?;
    let (x, edges) = chain_graph(4, 3)?;

    let features = encoder.forward_one_base(&x, &edges)?;

    assert_eq!(features.dims(), &[4, 459]);
    Ok(())
}

#[test]
fn test_graph_without_edges() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let x = Tensor::randn(0f32, 1.0, (3, 3), &Device::Cpu)?;
    let edges = Tensor::zeros((2, 0), DType::U32, &Device::Cpu)?;

    let features = encoder.forward_one_base(&x, &edges)?;

    assert_eq!(features.dims(), &[3, 51]);
    Ok(())
}

// ===========================================================================
// Batched classification
// ===========================================================================

#[test]
fn test_variable_size_batch() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let (features, edges): (Vec<_>, Vec<_>) = [5, 9, 3]
        .iter()
        .map(|&n| chain_graph(n, 3))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();

    let logits = encoder.forward(&features, &edges)?;

    assert_eq!(logits.dims(), &[3, 4]);
    Ok(())
}

#[test]
fn test_rows_follow_input_order() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let (x_a, e_a) = chain_graph(4, 3)?;
    let (x_b, e_b) = chain_graph(7, 3)?;

    let ab = encoder.forward(&[x_a.clone(), x_b.clone()], &[e_a.clone(), e_b.clone()])?;
    let ba = encoder.forward(&[x_b.clone(), x_a.clone()], &[e_b.clone(), e_a.clone()])?;
    let a = encoder.forward(&[x_a], &[e_a])?;

    assert!(max_abs_diff(&ab.get(0)?, &ba.get(1)?)? < 1e-5);
    assert!(max_abs_diff(&ab.get(1)?, &ba.get(0)?)? < 1e-5);
    assert!(max_abs_diff(&ab.get(0)?, &a.get(0)?)? < 1e-5);
    Ok(())
}

#[test]
fn test_identical_graphs_identical_logits() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let (x, edges) = chain_graph(5, 3)?;

    let logits = encoder.forward(&[x.clone(), x], &[edges.clone(), edges])?;

    assert!(max_abs_diff(&logits.get(0)?, &logits.get(1)?)? < 1e-6);
    Ok(())
}

#[test]
fn test_gradients_reach_attention_vectors() -> Result<()> {
    let (varmap, encoder) = build(&small_config())?;
    let (x, edges) = chain_graph(5, 3)?;

    let loss = encoder.forward(&[x], &[edges])?.sqr()?.sum_all()?;
    let grads = loss.backward()?;

    let data = varmap.data().lock().unwrap();
    for name in ["conv1.att_src", "conv3.lin.weight", "fc.6.weight"] {
        let var = data.get(name).unwrap_or_else(|| panic!("missing {name}"));
        assert!(grads.get(var.as_tensor()).is_some(), "no gradient for {name}");
    }
    Ok(())
}

// ===========================================================================
// Input contract
// ===========================================================================

#[test]
fn test_length_mismatch_fails() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let (x, edges) = chain_graph(4, 3)?;
    assert!(encoder.forward(&[x.clone(), x], &[edges]).is_err());
    assert!(encoder.forward(&[], &[]).is_err());
    Ok(())
}

#[test]
fn test_bad_shapes_fail() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let (x, edges) = chain_graph(4, 3)?;

    let wide = Tensor::randn(0f32, 1.0, (4, 5), &Device::Cpu)?;
    assert!(encoder.forward_one_base(&wide, &edges).is_err());

    let flat = Tensor::randn(0f32, 1.0, 12, &Device::Cpu)?;
    assert!(encoder.forward_one_base(&flat, &edges).is_err());

    let three_rows = Tensor::zeros((3, 2), DType::I64, &Device::Cpu)?;
    assert!(encoder.forward_one_base(&x, &three_rows).is_err());
    Ok(())
}

#[test]
fn test_graph_without_nodes_fails() -> Result<()> {
    let (_varmap, encoder) = build(&small_config())?;
    let x = Tensor::zeros((0, 3), DType::F32, &Device::Cpu)?;
    let edges = Tensor::zeros((2, 0), DType::U32, &Device::Cpu)?;

    assert!(encoder.readout(&x, &edges).is_err());
    assert!(encoder.forward(&[x], &[edges]).is_err());
    Ok(())
}

// ===========================================================================
// Attention layer
// ===========================================================================

#[test]
fn test_attention_normalised_per_target() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let gat = GatConv::new(3, 8, GatConfig::default(), vb)?;

    let x = Tensor::randn(0f32, 1.0, (4, 3), &Device::Cpu)?;
    let edges = Tensor::new(&[[0u32, 1, 2, 3, 0], [3, 3, 3, 0, 1]], &Device::Cpu)?;
    let (out, attention) = gat.forward_with_attention(&x, &edges)?;

    assert_eq!(out.dims(), &[4, 8]);
    // Five edges plus one self-loop per node
    assert_eq!(attention.alpha.dims(), &[9, 1]);

    let alpha = attention.alpha.flatten_all()?.to_vec1::<f32>()?;
    let mut sums = [0f32; 4];
    for (&target, a) in attention.dst.iter().zip(&alpha) {
        assert!(*a > 0.0);
        sums[target as usize] += a;
    }
    for (node, sum) in sums.iter().enumerate() {
        assert!((sum - 1.0).abs() < 1e-5, "node {node} sums to {sum}");
    }
    Ok(())
}
