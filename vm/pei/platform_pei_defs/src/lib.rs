// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire and register definitions shared by the platform PEI stage and the
//! stages that consume its hand-off record.
//!
//! Everything here is a raw layout or a constant: configuration channel item
//! identifiers, the e820 entry format, chipset register offsets, CPUID and MSR
//! bit layouts, the firmware volume header, the persisted boot-state record,
//! and the hand-off record format with its reader.

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![no_std]

/// Defines a fieldless `repr` enum that crosses a wire or register boundary,
/// along with lossless conversions to and from the raw value.
///
/// Unknown raw values convert to `None` rather than being transmuted, so a
/// value read from an untrusted source can never produce an invalid enum.
macro_rules! wire_enum {
    (
        $(#[$a:meta])*
        pub enum $name:ident: $repr:ident {
            $(
                $(#[$va:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$a])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr($repr)]
        pub enum $name {
            $(
                $(#[$va])*
                $variant = $value,
            )*
        }

        impl $name {
            /// Converts a raw value, returning `None` if it is not a known
            /// variant.
            pub const fn from_raw(value: $repr) -> Option<Self> {
                $(
                    if value == $value {
                        return Some(Self::$variant);
                    }
                )*
                None
            }

            /// Returns the raw value of this variant.
            pub const fn as_raw(self) -> $repr {
                self as $repr
            }
        }
    };
}

pub mod boot_state;
pub mod chipset;
pub mod config;
pub mod fv;
pub mod handoff;
pub mod x86;
