pub mod builders;
pub mod mock_executor;
pub mod strategies;

pub use builders::*;
pub use mock_executor::*;
pub use strategies::*;
