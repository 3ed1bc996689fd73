// Re-exports of the subsystem crates, for embedding the store
// without going through the executable.

pub use holdfast_admin as admin;
pub use holdfast_base as base;
pub use holdfast_http as http;
pub use holdfast_node as node;
pub use holdfast_repl as repl;
pub use holdfast_ring as ring;
