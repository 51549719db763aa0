//! C ABI bindings for the `lattice` hybrid table and string intern pool.
//!
//! This crate is a thin cdylib shell: every `#[no_mangle] extern "C"`
//! function lives in [`lattice::capi`] and is re-exported here so that it
//! is linked into the produced shared object. Keeping the implementation in
//! the rlib means `lattice` itself stays usable as an ordinary Rust
//! dependency for embedders that don't need a C ABI.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
#![allow(unknown_lints)]
#![warn(missing_debug_implementations)]
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]
#![warn(rust_2018_idioms)]
#![warn(unused_qualifications)]
#![warn(variant_size_differences)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_alias))]

pub use lattice::capi::*;

#[cfg(test)]
mod tests {
    use std::mem::{align_of, size_of};
    use std::os::raw::c_void;

    use lattice::capi::{lattice_value, lattice_value_tag};
    use memoffset::offset_of;

    #[test]
    fn lattice_value_tag_is_first_field() {
        assert_eq!(offset_of!(lattice_value, tag), 0);
    }

    #[test]
    fn lattice_value_size_and_align_are_pointer_friendly() {
        assert!(size_of::<lattice_value>() >= size_of::<*mut c_void>());
        assert!(align_of::<lattice_value>() >= align_of::<*mut c_void>());
    }

    #[test]
    fn lattice_value_tag_discriminants_are_stable() {
        assert_eq!(lattice_value_tag::Nil as u8, 0);
        assert_eq!(lattice_value_tag::Boolean as u8, 1);
        assert_eq!(lattice_value_tag::Number as u8, 2);
        assert_eq!(lattice_value_tag::String as u8, 3);
        assert_eq!(lattice_value_tag::LightUserdata as u8, 4);
        assert_eq!(lattice_value_tag::Userdata as u8, 5);
        assert_eq!(lattice_value_tag::Table as u8, 6);
    }
}
