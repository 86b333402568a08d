//! Correlation context carried through untyped stage maps.

mod correlation;

pub use correlation::{
    is_reserved, strip_reserved, Correlation, KEY_ACTIVATION, KEY_ACTIVATION_GENERATION,
    KEY_CAMPAIGN, KEY_NAMESPACE, KEY_OPERATION, KEY_ORIGIN, KEY_SCHEDULE, KEY_SITE, KEY_STAGE,
    RESERVED_PREFIX,
};
