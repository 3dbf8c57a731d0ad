mod sweeper;

pub use sweeper::LeaseSweeper;
