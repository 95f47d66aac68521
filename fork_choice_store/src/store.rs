use parking_lot::RwLock;
use types::{containers::Checkpoint, primitives::Epoch};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Checkpoints {
    pub justified: Checkpoint,
    pub best_justified: Checkpoint,
    pub finalized: Checkpoint,
    pub prev_justified: Checkpoint,
    pub prev_finalized: Checkpoint,
}

/// Justification and finality checkpoints known to the node.
///
/// Getters return copies. Persisting the checkpoints is up to the caller.
#[derive(Default, Debug)]
pub struct Store {
    checkpoints: RwLock<Checkpoints>,
}

impl Store {
    #[must_use]
    pub fn new(justified: Checkpoint, finalized: Checkpoint) -> Self {
        Self {
            checkpoints: RwLock::new(Checkpoints {
                justified,
                best_justified: justified,
                finalized,
                prev_justified: justified,
                prev_finalized: finalized,
            }),
        }
    }

    #[must_use]
    pub fn checkpoints(&self) -> Checkpoints {
        *self.checkpoints.read()
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.checkpoints.read().justified
    }

    #[must_use]
    pub fn best_justified_checkpoint(&self) -> Checkpoint {
        self.checkpoints.read().best_justified
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.checkpoints.read().finalized
    }

    #[must_use]
    pub fn prev_justified_checkpoint(&self) -> Checkpoint {
        self.checkpoints.read().prev_justified
    }

    #[must_use]
    pub fn prev_finalized_checkpoint(&self) -> Checkpoint {
        self.checkpoints.read().prev_finalized
    }

    pub fn set_justified_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints.write().justified = checkpoint;
    }

    pub fn set_best_justified_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints.write().best_justified = checkpoint;
    }

    pub fn set_finalized_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints.write().finalized = checkpoint;
    }

    pub fn set_prev_justified_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints.write().prev_justified = checkpoint;
    }

    pub fn set_prev_finalized_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints.write().prev_finalized = checkpoint;
    }

    /// Raises the justified checkpoint if `checkpoint` is newer.
    ///
    /// The best justified checkpoint follows along. Returns whether anything changed.
    pub fn update_justified(&self, checkpoint: Checkpoint) -> bool {
        let mut checkpoints = self.checkpoints.write();

        if checkpoint.epoch <= checkpoints.justified.epoch {
            return false;
        }

        checkpoints.prev_justified = checkpoints.justified;
        checkpoints.justified = checkpoint;

        if checkpoint.epoch > checkpoints.best_justified.epoch {
            checkpoints.best_justified = checkpoint;
        }

        true
    }

    /// Moves the current checkpoints into the previous ones and installs new ones.
    ///
    /// Does nothing if `finalized` would lower the finalized epoch.
    pub fn update_finalized(&self, justified: Checkpoint, finalized: Checkpoint) -> bool {
        let mut checkpoints = self.checkpoints.write();

        if finalized.epoch <= checkpoints.finalized.epoch {
            return false;
        }

        checkpoints.prev_finalized = checkpoints.finalized;
        checkpoints.finalized = finalized;

        if justified.epoch > checkpoints.justified.epoch {
            checkpoints.prev_justified = checkpoints.justified;
            checkpoints.justified = justified;
        }

        if checkpoints.justified.epoch > checkpoints.best_justified.epoch {
            checkpoints.best_justified = checkpoints.justified;
        }

        true
    }

    #[must_use]
    pub fn finalized_epoch(&self) -> Epoch {
        self.checkpoints.read().finalized.epoch
    }
}
