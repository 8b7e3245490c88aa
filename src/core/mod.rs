// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: task queue, worker threads and result channels.

mod channel;
mod engine;
mod envelope;
mod queue;
mod util;
mod worker;

pub use channel::TaskHandle;
pub use engine::{CpuPinningPolicy, Engine, EngineBuilder, EngineState, ThreadCount};
pub use envelope::TaskId;
pub use queue::{QueueClosed, TaskQueue};
