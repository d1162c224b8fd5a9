//! B+tree engine: composite-key insert/delete/fetch and cursor-driven
//! range scans over a disk-resident, slotted-page tree.

mod cursor;
mod tree;

pub use cursor::Cursor;
pub use tree::BTree;
