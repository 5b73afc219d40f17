mod alpha_beta;
mod bed;
mod eqd2;
mod response;

pub use alpha_beta::AlphaBetaTable;
pub use bed::bed;
pub use eqd2::eqd2;
pub use response::{eud, ntcp_lkb, tcp_logistic};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Dose per fraction must be greater than zero")]
    InvalidDosePerFraction,
    #[error("Total number of fractions must be greater than zero")]
    InvalidTotalFractions,
    #[error("Alpha beta ratio must be greater than zero")]
    InvalidAlphaBetaRatio,
    #[error("Dose values must be finite and non-negative")]
    InvalidDose,
    #[error("Volume-effect parameter n must be greater than zero")]
    InvalidVolumeEffect,
    #[error("Model parameter [{0}] must be greater than zero")]
    InvalidModelParameter(&'static str),
    #[error("EUD requires at least one dose value")]
    EmptyDoseVector,
}
