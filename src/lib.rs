// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod node;
pub mod os;
pub mod pipeline;
pub mod pool;
pub mod preflight;
pub mod report;
pub mod retry;
pub mod snapshot;
pub mod ssh;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use error::ClusterError;
pub use executor::{OperationResult, ParallelExecutor};
pub use node::{Node, NodeRole};
