//! Batch chunking along the leading tensor axis

use std::ops::Range;

use burn::prelude::*;

/// Split `total` items into consecutive sub-batches of at most `max_batch_size`
pub fn split_batch(total: usize, max_batch_size: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + max_batch_size).min(total);
        ranges.push(start..end);
        start = end;
    }

    ranges
}

/// Rows `range` of a `[N, C, H, W]` tensor
pub fn slice_batch<B: Backend>(tensor: &Tensor<B, 4>, range: Range<usize>) -> Tensor<B, 4> {
    let [_, c, h, w] = tensor.dims();
    tensor.clone().slice([range, 0..c, 0..h, 0..w])
}

/// Apply `f` to sub-batches of `tensor` and concatenate the results in order
pub fn map_batched<B, F>(tensor: Tensor<B, 4>, batch_size: usize, mut f: F) -> Tensor<B, 4>
where
    B: Backend,
    F: FnMut(Tensor<B, 4>) -> Tensor<B, 4>,
{
    let [n, ..] = tensor.dims();
    if n <= batch_size {
        return f(tensor);
    }

    let outputs = split_batch(n, batch_size)
        .into_iter()
        .map(|range| f(slice_batch(&tensor, range)))
        .collect();
    Tensor::cat(outputs, 0)
}

/// Seed for sub-batch `index`: incremented from `base`
pub fn batch_seed(base: Option<u64>, index: usize) -> Option<u64> {
    base.map(|seed| seed.wrapping_add(index as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_split_batch() {
        let ranges = split_batch(10, 3);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], 0..3);
        assert_eq!(ranges[3], 9..10);

        assert!(split_batch(0, 3).is_empty());
        assert_eq!(split_batch(2, 8), vec![0..2]);
    }

    #[test]
    fn test_map_batched_preserves_order() {
        let device = Default::default();
        let input = Tensor::<TestBackend, 1, Int>::arange(0..5, &device)
            .float()
            .reshape([5, 1, 1, 1]);

        let mut calls = Vec::new();
        let output = map_batched(input, 2, |chunk| {
            calls.push(chunk.dims()[0]);
            chunk * 10.0
        });

        assert_eq!(calls, vec![2, 2, 1]);
        let values: Vec<f32> = output.into_data().iter::<f32>().collect();
        assert_eq!(values, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_batch_seed() {
        assert_eq!(batch_seed(Some(42), 2), Some(44));
        assert_eq!(batch_seed(Some(u64::MAX), 1), Some(0));
        assert_eq!(batch_seed(None, 3), None);
    }
}
