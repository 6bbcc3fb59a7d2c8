/// Catalog core: persistence and query layer over the SQLite store.
///
/// This module is the complete data-access contract for any front end:
/// - Dataset registry, image catalog, and paged queries (library.rs)
/// - Shared data structures (data.rs)
/// - Decision overlay set/clear/list (decisions.rs)
/// - Bulk decision import with newer-wins reconciliation (import.rs)
/// - Flattened CSV export (export.rs)
/// - Archetype/category grouping derived from metadata (groups.rs)
pub mod data;
pub mod decisions;
pub mod export;
pub mod groups;
pub mod import;
pub mod library;
