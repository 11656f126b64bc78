//! Consumer trait shared by the streaming operators.
//!
//! An operator sees the source's batches one at a time, in delivery order,
//! and produces its result only once the sequence is exhausted. Any error
//! drops the operator together with its partial state.

use chunkflow_core::cancel::CancellationToken;
use chunkflow_core::error::{Error, Result};
use chunkflow_core::types::RowBatch;

pub trait BatchConsumer {
    type Output;

    /// Human-readable operator name (stable).
    fn name(&self) -> &'static str;

    /// Fold one batch into the operator's state.
    fn consume(&mut self, batch: RowBatch) -> Result<()>;

    /// Finalize once the source is exhausted.
    fn finish(self) -> Result<Self::Output>
    where
        Self: Sized;
}

/// Drive `consumer` over `batches` to completion.
///
/// The token is checked once per batch, before the batch is pulled.
pub fn drive<C, I>(
    mut consumer: C,
    batches: I,
    cancel: Option<&CancellationToken>,
) -> Result<C::Output>
where
    C: BatchConsumer,
    I: IntoIterator<Item = Result<RowBatch>>,
{
    let mut seen = 0usize;
    let mut batches = batches.into_iter();
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::info!(operator = consumer.name(), batches = seen, "operation cancelled");
            return Err(Error::Cancelled { batches: seen });
        }
        match batches.next() {
            Some(batch) => {
                consumer.consume(batch?)?;
                seen += 1;
            }
            None => break,
        }
    }
    consumer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkflow_core::types::{Column, Scalar};

    #[derive(Default)]
    struct RowCounter(usize);

    impl BatchConsumer for RowCounter {
        type Output = usize;

        fn name(&self) -> &'static str {
            "row_counter"
        }

        fn consume(&mut self, batch: RowBatch) -> Result<()> {
            self.0 += batch.num_rows();
            Ok(())
        }

        fn finish(self) -> Result<usize> {
            Ok(self.0)
        }
    }

    fn batch(n: usize) -> Result<RowBatch> {
        RowBatch::try_new(vec![Column::new("x", vec![Scalar::I64(1); n])])
    }

    #[test]
    fn drives_to_completion() {
        let out = drive(RowCounter::default(), vec![batch(2), batch(3)], None).unwrap();
        assert_eq!(out, 5);
    }

    #[test]
    fn source_error_discards_state() {
        let input = vec![batch(2), Err(Error::io("t", "reset")), batch(3)];
        assert!(matches!(
            drive(RowCounter::default(), input, None),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn cancelled_token_stops_before_next_batch() {
        let token = CancellationToken::new();
        token.cancel();
        let err = drive(RowCounter::default(), vec![batch(1)], Some(&token)).unwrap_err();
        assert!(matches!(err, Error::Cancelled { batches: 0 }));
    }
}
