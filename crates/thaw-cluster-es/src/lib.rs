mod es;
pub mod parse;

pub use es::{EsClusterClient, EsEndpoint};
