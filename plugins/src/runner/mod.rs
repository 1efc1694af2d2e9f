mod child;

pub use child::ChildRunner;
