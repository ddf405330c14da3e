//! Fail-fast wrapper around the persistent coins view.

use crate::{Coin, CoinsCursor, CoinsMap, CoinsView, CoinsViewBacked, Error, Result};
use bitcoin::{BlockHash, OutPoint};

/// Turns backend read failures into a process abort.
///
/// Reporting an unreadable coin as missing would be taken by every caller as a
/// legitimate absence, e.g. treating an existing output as nonexistent. Writes below
/// this layer are atomic, so exiting right away cannot leave partial state behind.
pub struct CoinsViewErrorCatcher<'a> {
    base: CoinsViewBacked<'a>,
    err_callbacks: Vec<Box<dyn Fn() + 'a>>,
    abort_on_error: bool,
}

impl<'a> CoinsViewErrorCatcher<'a> {
    pub fn new(base: &'a mut dyn CoinsView) -> Self {
        Self {
            base: CoinsViewBacked::new(base),
            err_callbacks: Vec::new(),
            abort_on_error: true,
        }
    }

    /// Returns [`Error::UnrecoverableRead`] instead of aborting.
    ///
    /// For embedders that run their own shutdown path on fatal errors, and for tests.
    pub fn without_abort(mut self) -> Self {
        self.abort_on_error = false;
        self
    }

    /// Registers a callback run before the process goes down on a read error.
    pub fn add_read_err_callback(&mut self, callback: impl Fn() + 'a) {
        self.err_callbacks.push(Box::new(callback));
    }

    pub fn set_backend(&mut self, base: &'a mut dyn CoinsView) {
        self.base.set_backend(base);
    }

    fn on_read_error(&self, err: Error) -> Error {
        if err.is_fatal() {
            return err;
        }

        for callback in &self.err_callbacks {
            callback();
        }

        tracing::error!("Error reading from database: {err}");

        if self.abort_on_error {
            std::process::abort();
        }

        Error::UnrecoverableRead(err.to_string())
    }
}

impl CoinsView for CoinsViewErrorCatcher<'_> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        self.base
            .get_coin(outpoint)
            .map_err(|err| self.on_read_error(err))
    }

    fn has_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        self.base
            .has_coin(outpoint)
            .map_err(|err| self.on_read_error(err))
    }

    fn best_block(&mut self) -> BlockHash {
        self.base.best_block()
    }

    fn head_blocks(&self) -> Vec<BlockHash> {
        self.base.head_blocks()
    }

    fn batch_write(&mut self, entries: &mut CoinsMap, best_block: BlockHash) -> Result<()> {
        self.base.batch_write(entries, best_block)
    }

    fn cursor(&self) -> Option<CoinsCursor<'_>> {
        self.base.cursor()
    }

    fn estimate_size(&self) -> usize {
        self.base.estimate_size()
    }
}
