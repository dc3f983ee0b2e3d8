//! Split strategies for `f64` vectors and shared buffers.

use fission::split::{SplitResult, SplitTypeError};
use fission::{Elements, SplitApi, SplitChunk, SplitType, Value};

use crate::shared::SharedVec;

/// Contiguous-range splitter over `Vec<f64>` values.
///
/// Pieces are owned copies of the requested range; partial results merge by
/// concatenation, so combining zero pieces yields an empty vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct VecSplit;

impl VecSplit {
    pub fn split_type() -> SplitType {
        SplitType::extension(VecSplit)
    }
}

impl SplitApi for VecSplit {
    fn name(&self) -> &'static str {
        "VecSplit"
    }

    fn split(&self, start: usize, end: usize, value: &Value) -> SplitResult<SplitChunk> {
        let data = downcast_vec(value)?;
        if start >= data.len() {
            return Ok(SplitChunk::Stop);
        }
        let end = end.min(data.len());
        Ok(SplitChunk::Piece(fission::value(data[start..end].to_vec())))
    }

    fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>> {
        let mut merged = Vec::new();
        for piece in &pieces {
            merged.extend_from_slice(downcast_vec(piece)?);
        }
        Ok(Some(fission::value(merged)))
    }

    fn elements(&self, value: &Value) -> SplitResult<Elements> {
        Ok(Elements::Count(downcast_vec(value)?.len()))
    }
}

fn downcast_vec(value: &Value) -> SplitResult<&Vec<f64>> {
    value
        .downcast_ref::<Vec<f64>>()
        .ok_or_else(|| SplitTypeError::execution("expected a Vec<f64> value"))
}

/// Splitter handing out disjoint mutable views of a [`SharedVec`].
///
/// Mutations land in the shared buffer directly, so combine has nothing to
/// merge and reports `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedVecSplit;

impl SharedVecSplit {
    pub fn split_type() -> SplitType {
        SplitType::extension(SharedVecSplit)
    }
}

impl SplitApi for SharedVecSplit {
    fn name(&self) -> &'static str {
        "SharedVecSplit"
    }

    fn split(&self, start: usize, end: usize, value: &Value) -> SplitResult<SplitChunk> {
        let buffer = value
            .downcast_ref::<SharedVec>()
            .ok_or_else(|| SplitTypeError::execution("expected a SharedVec value"))?;
        if start >= buffer.len() {
            return Ok(SplitChunk::Stop);
        }
        Ok(SplitChunk::Piece(fission::value(buffer.view(start..end))))
    }

    fn combine(&self, _pieces: Vec<Value>) -> SplitResult<Option<Value>> {
        Ok(None)
    }

    fn elements(&self, value: &Value) -> SplitResult<Elements> {
        let buffer = value
            .downcast_ref::<SharedVec>()
            .ok_or_else(|| SplitTypeError::execution("expected a SharedVec value"))?;
        Ok(Elements::Count(buffer.len()))
    }
}

/// Merge-only strategy for scalar partial sums produced by reductions.
///
/// Sums cannot be re-split; consumers must broadcast them. Partials merge by
/// addition, with `0.0` as the empty identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarSumSplit;

impl ScalarSumSplit {
    pub fn split_type() -> SplitType {
        SplitType::extension(ScalarSumSplit)
    }
}

impl SplitApi for ScalarSumSplit {
    fn name(&self) -> &'static str {
        "ScalarSumSplit"
    }

    fn split(&self, _start: usize, _end: usize, _value: &Value) -> SplitResult<SplitChunk> {
        Err(SplitTypeError::Unsupported {
            op: "split",
            ty: self.name().to_string(),
        })
    }

    fn combine(&self, pieces: Vec<Value>) -> SplitResult<Option<Value>> {
        let mut total = 0.0f64;
        for piece in &pieces {
            total += piece
                .downcast_ref::<f64>()
                .ok_or_else(|| SplitTypeError::execution("expected an f64 partial sum"))?;
        }
        Ok(Some(fission::value(total)))
    }

    fn elements(&self, _value: &Value) -> SplitResult<Elements> {
        Ok(Elements::Unbounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_split_round_trips_under_any_partitioning() {
        let source: Vec<f64> = (0..100).map(f64::from).collect();
        let value = fission::value(source.clone());
        for batch in [1usize, 7, 32, 100, 1000] {
            let mut pieces = Vec::new();
            let mut start = 0;
            loop {
                match VecSplit.split(start, start + batch, &value).unwrap() {
                    SplitChunk::Piece(piece) => pieces.push(piece),
                    SplitChunk::Stop => break,
                    SplitChunk::Stream(_) => panic!("VecSplit is not streaming"),
                }
                start += batch;
            }
            let merged = VecSplit.combine(pieces).unwrap().expect("merged value");
            assert_eq!(merged.downcast_ref::<Vec<f64>>().unwrap(), &source);
        }
    }

    #[test]
    fn vec_split_combines_zero_pieces_to_empty() {
        let merged = VecSplit.combine(Vec::new()).unwrap().expect("identity");
        assert!(merged.downcast_ref::<Vec<f64>>().unwrap().is_empty());
    }

    #[test]
    fn scalar_sum_merges_by_addition() {
        let pieces = vec![fission::value(1.5f64), fission::value(2.5f64)];
        let merged = ScalarSumSplit.combine(pieces).unwrap().expect("sum");
        assert_eq!(*merged.downcast_ref::<f64>().unwrap(), 4.0);
        assert!(ScalarSumSplit
            .split(0, 1, &fission::value(0.0f64))
            .is_err());
    }

    #[test]
    fn shared_split_stops_past_the_end() {
        let buffer = SharedVec::filled(1.0, 4);
        let value = fission::value(buffer);
        assert!(matches!(
            SharedVecSplit.split(4, 8, &value).unwrap(),
            SplitChunk::Stop
        ));
        assert_eq!(
            SharedVecSplit.elements(&value).unwrap(),
            Elements::Count(4)
        );
    }
}
