//! Test support for the pool job-management core

pub mod mocks;
pub mod utils;

pub use mocks::{
    AuthCall, CallLog, MockAuthorizer, MockChain, MockDaemon, MockJob, MockStratum,
    MockWorkerContext, PollStep, RecordingReporter,
};
pub use utils::TestUtils;
