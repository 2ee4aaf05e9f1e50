use weft_core::{BoxingError, DType, Distribution, LocalBuffer, Placement};

/// A logically global tensor whose storage is partitioned across a
/// placement according to a distribution. The local buffer holds only the
/// calling rank's shard; ranks outside the placement hold nothing and must
/// not read the value.
#[derive(Debug, Clone)]
pub struct ConsistentTensor {
    global_shape: Vec<usize>,
    dtype: DType,
    placement: Placement,
    distribution: Distribution,
    local: Option<LocalBuffer>,
}

impl ConsistentTensor {
    pub(crate) fn new_unchecked(
        global_shape: Vec<usize>,
        dtype: DType,
        placement: Placement,
        distribution: Distribution,
        local: Option<LocalBuffer>,
    ) -> Self {
        ConsistentTensor {
            global_shape,
            dtype,
            placement,
            distribution,
            local,
        }
    }

    pub fn global_shape(&self) -> &[usize] {
        &self.global_shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// The local shard, if the calling rank is resident.
    pub fn local(&self) -> Option<&LocalBuffer> {
        self.local.as_ref()
    }

    /// The calling rank's shard; fails when this rank is not in the
    /// placement.
    pub fn to_local(&self) -> Result<&LocalBuffer, BoxingError> {
        self.local.as_ref().ok_or_else(|| {
            BoxingError::new(
                weft_core::ErrorKind::RankNotInPlacement,
                format!("no local shard; this rank is not in {}", self.placement),
            )
            .with_placement(&self.placement)
        })
    }

    pub fn into_local(self) -> Result<LocalBuffer, BoxingError> {
        let placement = self.placement;
        self.local.ok_or_else(|| {
            BoxingError::new(
                weft_core::ErrorKind::RankNotInPlacement,
                format!("no local shard; this rank is not in {placement}"),
            )
            .with_placement(&placement)
        })
    }
}
