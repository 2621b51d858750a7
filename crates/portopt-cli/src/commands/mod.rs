pub mod audit;
pub mod optimize;
pub mod risk;
pub mod tcost;
