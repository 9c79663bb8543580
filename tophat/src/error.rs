use facet::Facet;

/// Errors a render target can report. Entry store operations never fail:
/// stale ids are reported through their boolean results instead.
#[derive(Facet, Debug)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum HeadError {
    /// document has no root element
    MissingRoot,

    /// document has no head element
    MissingHead,

    /// document has no body element
    MissingBody,
}
