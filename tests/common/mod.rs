pub mod builders;
pub mod mock_dispatcher;

pub use builders::*;
pub use mock_dispatcher::*;
