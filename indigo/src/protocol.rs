//! INDIGO XML Protocol definitions

use crate::PropertyType;

/// INDIGO protocol version
pub const INDIGO_PROTOCOL_VERSION: &str = "2.0";

/// Role of a vector element on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VectorKind {
    /// `def*Vector`, server announces a property
    Define,
    /// `set*Vector`, server reports a new value
    Update,
    /// `new*Vector`, client requests a change
    New,
}

/// Classification of an element tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Element {
    Vector(VectorKind, PropertyType),
    Item(PropertyType),
    DelProperty,
    Message,
    GetProperties,
    Other,
}

/// Classify an element tag name
pub(crate) fn classify(tag: &str) -> Element {
    match tag {
        "delProperty" => return Element::DelProperty,
        "message" => return Element::Message,
        "getProperties" => return Element::GetProperties,
        _ => {}
    }

    if let Some(body) = tag.strip_suffix("Vector") {
        let (kind, ty) = if let Some(ty) = body.strip_prefix("def") {
            (VectorKind::Define, ty)
        } else if let Some(ty) = body.strip_prefix("set") {
            (VectorKind::Update, ty)
        } else if let Some(ty) = body.strip_prefix("new") {
            (VectorKind::New, ty)
        } else {
            return Element::Other;
        };
        return PropertyType::from_wire_name(ty)
            .map(|ty| Element::Vector(kind, ty))
            .unwrap_or(Element::Other);
    }

    tag.strip_prefix("def")
        .or_else(|| tag.strip_prefix("one"))
        .and_then(PropertyType::from_wire_name)
        .map(Element::Item)
        .unwrap_or(Element::Other)
}

/// Standard INDIGO properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECTED: &str = "CONNECTED";
    pub const DISCONNECTED: &str = "DISCONNECTED";

    /// Driver information
    pub const INFO: &str = "INFO";

    // Camera properties
    pub const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
    pub const CCD_EXPOSURE_ITEM: &str = "EXPOSURE";
    pub const CCD_ABORT_EXPOSURE: &str = "CCD_ABORT_EXPOSURE";
    pub const CCD_UPLOAD_MODE: &str = "CCD_UPLOAD_MODE";
    pub const CCD_LOCAL_MODE: &str = "CCD_LOCAL_MODE";
    pub const CCD_IMAGE: &str = "CCD_IMAGE";

    // Filter wheel properties
    pub const WHEEL_SLOT: &str = "WHEEL_SLOT";

    // Agent properties
    pub const FILTER_CCD_LIST: &str = "FILTER_CCD_LIST";
}
