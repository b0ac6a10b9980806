//! Execution of data-parallel loops.
//!
//! Every loop over dofs, elements or constrained indices is issued through an [`Executor`],
//! which decides whether the loop runs sequentially or on the rayon thread pool.
use crate::buffer::Device;
use fenris_paradis::DisjointIndices;
use log::trace;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Iteration count above which host loops run in parallel.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1000;

/// How a single loop is executed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// The loop operates on device-resident data.
    pub offload: bool,
    pub parallel: bool,
}

/// Sequential or rayon-parallel execution of loop bodies.
///
/// A loop is offloaded when its data is device-resident, and parallel when it is offloaded or
/// when its iteration count exceeds the parallel threshold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executor {
    parallel_threshold: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_THRESHOLD)
    }
}

impl Executor {
    pub fn new(parallel_threshold: usize) -> Self {
        Self { parallel_threshold }
    }

    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    pub fn dispatch(&self, count: usize, device: Device) -> Dispatch {
        let offload = device == Device::Accelerator;
        let parallel = offload || count > self.parallel_threshold;
        trace!(
            "Dispatching loop over {} iterations (offload: {}, parallel: {})",
            count,
            offload,
            parallel
        );
        Dispatch { offload, parallel }
    }

    /// Calls `f(i, &mut data[i])` for every entry of `data`.
    pub fn for_each_mut<T, F>(&self, device: Device, data: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        if self.dispatch(data.len(), device).parallel {
            data.par_iter_mut()
                .enumerate()
                .for_each(|(i, x)| f(i, x));
        } else {
            data.iter_mut().enumerate().for_each(|(i, x)| f(i, x));
        }
    }

    /// Calls `f(chunk_index, chunk)` for every contiguous chunk of `data` of length `chunk_size`.
    ///
    /// Does nothing if `chunk_size` is zero.
    pub fn for_each_chunk_mut<T, F>(&self, device: Device, data: &mut [T], chunk_size: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        if chunk_size == 0 {
            return;
        }
        let num_chunks = data.len() / chunk_size;
        if self.dispatch(num_chunks, device).parallel {
            data.par_chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk));
        } else {
            data.chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk));
        }
    }

    /// Fallible chunk loop with a per-task workspace created by `init`.
    ///
    /// The first error encountered is returned. When running in parallel, which error is
    /// reported first is unspecified, and other chunks may already have been processed.
    pub fn try_for_each_chunk_mut_init<T, W, E, I, F>(
        &self,
        device: Device,
        data: &mut [T],
        chunk_size: usize,
        init: I,
        f: F,
    ) -> Result<(), E>
    where
        T: Send,
        E: Send,
        I: Fn() -> W + Sync + Send,
        F: Fn(&mut W, usize, &mut [T]) -> Result<(), E> + Sync + Send,
    {
        if chunk_size == 0 {
            return Ok(());
        }
        let num_chunks = data.len() / chunk_size;
        if self.dispatch(num_chunks, device).parallel {
            data.par_chunks_mut(chunk_size)
                .enumerate()
                .try_for_each_init(&init, |workspace, (i, chunk)| f(workspace, i, chunk))
        } else {
            let mut workspace = init();
            data.chunks_mut(chunk_size)
                .enumerate()
                .try_for_each(|(i, chunk)| f(&mut workspace, i, chunk))
        }
    }

    /// Calls `f(position, &mut data[indices[position]])` for every position in the index list.
    pub fn for_each_index_mut<T, F>(&self, device: Device, indices: &DisjointIndices, data: &mut [T], f: F)
    where
        T: Send + Sync,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        if self.dispatch(indices.len(), device).parallel {
            indices.par_for_each_mut(data, f);
        } else {
            indices.for_each_mut(data, f);
        }
    }
}
