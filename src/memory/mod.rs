//! 记忆层：任务账本（只追加的任务状态与轨迹）、子任务工作记忆

pub mod ledger;
pub mod working;

pub use ledger::{CandidateRecord, Ledger, LedgerEntry, LedgerEvent};
pub use working::WorkingMemory;
