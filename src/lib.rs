use lazy_static::lazy_static;
use marker_catalog::{MarkerCatalog, default_marker_catalog};
use size_standard::{SizeLadderCatalog, default_size_ladders};

pub mod about;
pub mod allele_editor;
pub mod config;
pub mod error;
pub mod layers;
pub mod loader;
pub mod marker_catalog;
pub mod notice;
pub mod remote;
pub mod render_trace;
pub mod sample;
pub mod session;
pub mod size_standard;
pub mod view_state;

pub use allelescope_protocol as protocol;

lazy_static! {
    // Built-in STR marker table
    pub static ref MARKER_CATALOG: MarkerCatalog = default_marker_catalog();

    // Size-standard ladders
    pub static ref SIZE_LADDERS: SizeLadderCatalog = default_size_ladders();
}
