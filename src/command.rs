// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Deferred graphics commands.

Operations on images are recorded into a [CommandQueue] and only reach the
native driver when the queue is flushed.  Reading pixels back is the one
operation that forces a flush, because it needs every earlier command to have
executed.
*/

mod image;
mod queue;

pub(crate) use image::{Image, Shader};
pub(crate) use queue::CommandQueue;
