//! Split oversized batches so no yielded batch exceeds the target size.

use chunkflow_core::error::Result;
use chunkflow_core::types::RowBatch;

/// Iterator adapter that slices each incoming batch into pieces of at most
/// `batch_size` rows. Small batches pass through untouched; batches are never
/// merged.
pub struct Rechunk<I> {
    inner: I,
    batch_size: usize,
    current: Option<(RowBatch, usize)>,
}

impl<I> Rechunk<I> {
    pub fn new(inner: I, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            current: None,
        }
    }
}

impl<I> Iterator for Rechunk<I>
where
    I: Iterator<Item = Result<RowBatch>>,
{
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((batch, offset)) = self.current.take() {
            let piece = batch.slice(offset, self.batch_size);
            let next = offset + piece.num_rows();
            if next < batch.num_rows() {
                self.current = Some((batch, next));
            }
            return Some(Ok(piece));
        }

        match self.inner.next()? {
            Ok(batch) if batch.num_rows() > self.batch_size => {
                self.current = Some((batch, 0));
                self.next()
            }
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_core::types::{Column, Scalar};

    fn batch(n: i64) -> RowBatch {
        RowBatch::try_new(vec![Column::new("v", (0..n).map(Scalar::I64).collect())]).unwrap()
    }

    #[test]
    fn splits_large_and_keeps_small() {
        let input = vec![Ok(batch(7)), Ok(batch(2)), Ok(batch(3))];
        let sizes: Vec<usize> = Rechunk::new(input.into_iter(), 3)
            .map(|b| b.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1, 2, 3]);
    }

    #[test]
    fn preserves_row_order() {
        let out: Vec<RowBatch> = Rechunk::new(vec![Ok(batch(5))].into_iter(), 2)
            .collect::<Result<_>>()
            .unwrap();
        let all = RowBatch::concat_rows(&out).unwrap();
        assert_eq!(all, batch(5));
    }
}
