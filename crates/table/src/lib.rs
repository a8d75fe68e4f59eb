//! crudkit table side: column specs from schema metadata, list filter
//! loading, cell rendering and a model-bound view that refreshes on events.

#![forbid(unsafe_code)]

pub mod cells;
pub mod filters;
pub mod view;

pub use cells::{load_related, render_cell, render_row, Cell, RelatedRecords};
pub use crudkit_core::columns::{boolean_filter, build_columns, column_for, ColumnSpec, FilterOption, FilterSpec};
pub use filters::{filters_to_query, load_list_filters};
pub use view::TableView;
