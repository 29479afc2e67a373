use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Signature errors: an argument tag outside the closed set.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Raw tag code reported by the kernel compiler is not a known argument type.
    #[snafu(display("unknown argument type tag: {raw}"))]
    UnknownTag { raw: u8 },

    /// Text component of a cache key is not a known argument type code.
    #[snafu(display("unknown argument type code: '{code}'"))]
    UnknownCode { code: String },
}
