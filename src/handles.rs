//! Integer handles for everything resolved through a collaborator registry.
//! A handle is plain data; `INVALID` marks "no object" at API boundaries.

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

define_handle!(
    /// A material resolved by the material registry collaborator.
    MaterialId
);
define_handle!(
    /// A mesh binding ("visual") owned by external geometry systems.
    VisualId
);
define_handle!(
    /// A shader description resolved by the shader registry collaborator.
    ShaderId
);
define_handle!(
    /// A GPU buffer owned by the render device.
    BufferId
);
define_handle!(
    /// A compiled GPU program owned by the render device.
    ProgramId
);
define_handle!(
    /// A named logical resource (texture or buffer view) from the resource registry.
    ResourceId
);
define_handle!(
    /// A GPU timestamp or disjoint query owned by the render device.
    QueryId
);
