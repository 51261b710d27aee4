pub mod comparator;
pub mod differ;
pub mod engine;
pub mod entry;
pub mod executor;
pub mod lister;
pub mod report;

pub use comparator::{equal, ComparePolicy};
pub use differ::{diff, diff_with_resolution, Action, ActionKind, ActionPlan, PlanSummary};
pub use engine::{PreparedRun, SyncEngine};
pub use entry::{Entry, EntryKind, RelPath, Tree};
pub use executor::Executor;
pub use lister::{ExcludeSet, RootState, TreeLister};
pub use report::{Failure, Oversize, Report};
