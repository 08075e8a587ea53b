//! Scoped engine resources.
//!
//! Both guards release what they acquired when dropped, whether the run
//! finished, failed, or unwound.

use std::ops::{Deref, DerefMut};

use tracing::{debug, info, warn};

use contourkit_shared::Result;

use crate::GeometryEngine;

/// An engine with licensed extensions checked out and overwrite enabled.
///
/// Extensions are checked back in, in reverse order, on drop.
pub struct EngineSession<'a, E: GeometryEngine + ?Sized> {
    engine: &'a mut E,
    checked_out: Vec<String>,
}

impl<'a, E: GeometryEngine + ?Sized> EngineSession<'a, E> {
    /// Enable overwrite and check out every extension.
    ///
    /// If a check-out fails, the extensions already acquired are released
    /// before the error is returned.
    pub fn open(engine: &'a mut E, extensions: &[String]) -> Result<Self> {
        let mut session = Self {
            engine,
            checked_out: Vec::with_capacity(extensions.len()),
        };
        session.engine.set_overwrite_output(true)?;

        for extension in extensions {
            session.engine.check_out_extension(extension)?;
            debug!(%extension, "extension checked out");
            session.checked_out.push(extension.clone());
        }

        info!(
            engine = session.engine.name(),
            extensions = session.checked_out.len(),
            "engine session opened"
        );
        Ok(session)
    }

    /// Extensions currently held by this session.
    pub fn extensions(&self) -> &[String] {
        &self.checked_out
    }
}

impl<E: GeometryEngine + ?Sized> Deref for EngineSession<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: GeometryEngine + ?Sized> DerefMut for EngineSession<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: GeometryEngine + ?Sized> Drop for EngineSession<'_, E> {
    fn drop(&mut self) {
        while let Some(extension) = self.checked_out.pop() {
            if let Err(e) = self.engine.check_in_extension(&extension) {
                warn!(%extension, error = %e, "failed to check in extension");
            }
        }
        debug!("engine session closed");
    }
}

/// Forces the engine's parallel processing factor for as long as it lives,
/// then restores the previous value.
pub struct ParallelismOverride<'a, E: GeometryEngine + ?Sized> {
    engine: &'a mut E,
    previous: Option<String>,
}

impl<'a, E: GeometryEngine + ?Sized> ParallelismOverride<'a, E> {
    pub fn set(engine: &'a mut E, factor: &str) -> Result<Self> {
        let previous = engine.parallel_processing_factor()?;
        engine.set_parallel_processing_factor(Some(factor.to_string()))?;
        debug!(factor, ?previous, "parallel processing factor overridden");
        Ok(Self { engine, previous })
    }
}

impl<E: GeometryEngine + ?Sized> Deref for ParallelismOverride<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: GeometryEngine + ?Sized> DerefMut for ParallelismOverride<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: GeometryEngine + ?Sized> Drop for ParallelismOverride<'_, E> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        if let Err(e) = self.engine.set_parallel_processing_factor(previous) {
            warn!(error = %e, "failed to restore parallel processing factor");
        }
    }
}
