//! CLI command implementations.
//!
//! Commands return structured results; the binary decides how to print them.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `simulate` | Replay request paths through the configured policy and heap |
//! | `report` | Summarise a diagnostic log per endpoint |
//!
//! # Example Usage
//!
//! ```bash
//! # Which of these requests would reclaim with an interval of 3?
//! printf '/a\n/b\n/c\n' | OOBGC_INTERVAL=3 oobgc simulate
//!
//! # Summarise worker 1's diagnostic log
//! oobgc report log/oobgc-worker-1.csv --json
//! ```

mod report;
mod simulate;

pub use report::{EndpointSummary, render_summaries, summarize};
pub use simulate::{
    SimulateOptions, SimulationReport, SimulationStep, read_paths, run_simulation,
};
