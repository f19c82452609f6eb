//!
//! Per-object instance variable storage for a Ruby object model.
//!
//! Every class owns a [`VariableTableManager`] that maps variable names to
//! slot indices shared by all of its instances. Objects carry a lazily
//! allocated backing array shaped by that table, grown either lock-free
//! through a per-object stamp or under a per-object monitor.
//!

mod accessor;
mod class;
mod error;
pub mod identity;
mod object;
mod runtime;
mod storage;
mod symbols;
mod table;
mod value;

pub use accessor::*;
pub use class::*;
pub use error::*;
pub use identity::{ObjectId, ObjectIdGenerator, ObjectRegistry};
pub use object::*;
pub use runtime::*;
pub use storage::*;
pub use symbols::*;
pub use table::*;
pub use value::*;
