mod handler;
mod waker;

pub use handler::{
    handler_into_waker, InterestHandler, InterestSet, InterestType, InterestWaker, WaitAny,
};
pub use waker::InlineWaker;
