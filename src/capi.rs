//! C ABI surface.
//!
//! Tables, the intern pool, and strings are exposed to C callers as opaque
//! handles (`*mut lattice_table`, `*mut lattice_intern`, `*const lattice_str`)
//! allocated with `Box::into_raw` and released with the matching `_free`
//! function. Values cross the boundary by a tagged `#[repr(C)]` struct,
//! [`lattice_value`], rather than by pointer, since most of them are small
//! enough to pass by value and it keeps the calling convention uniform
//! across every key/value kind.
//!
//! String and userdata payloads carried inside a [`lattice_value`] are
//! borrowed, not owned, by the callee: passing one into a `*_set` function
//! does not consume the caller's reference. Values read back out (from
//! `*_get`, `*_next`, or `lattice_string_intern`) are a fresh strong
//! reference the caller must release with [`lattice_value_release`].

use std::cell::RefCell;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::rc::Rc;
use std::slice;

use crate::intern::{Intern, StrObj};
use crate::table::Table;
use crate::value::Value;

/// Discriminant for [`lattice_value`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum lattice_value_tag {
    Nil = 0,
    Boolean = 1,
    Number = 2,
    String = 3,
    LightUserdata = 4,
    Userdata = 5,
    Table = 6,
}

/// A tagged union carrying any runtime value across the C ABI boundary.
/// Only the field matching `tag` is meaningful.
#[repr(C)]
pub struct lattice_value {
    pub tag: lattice_value_tag,
    pub boolean: bool,
    pub number: f64,
    pub pointer: *mut c_void,
}

const _: () = [()][!(std::mem::size_of::<lattice_value>() >= std::mem::size_of::<u64>()) as usize];

impl lattice_value {
    const fn nil() -> Self {
        Self {
            tag: lattice_value_tag::Nil,
            boolean: false,
            number: 0.0,
            pointer: ptr::null_mut(),
        }
    }
}

/// An opaque, reference-counted, interior-mutable table handle.
pub struct lattice_table(Rc<RefCell<Table>>);

/// An opaque string-interning pool handle.
pub struct lattice_intern(Intern);

/// An interned string. Obtained from [`lattice_string_intern`] or unwrapped
/// from a [`lattice_value`] tagged `String`.
pub type lattice_str = StrObj;

unsafe fn value_from_c(v: &lattice_value) -> Value {
    match v.tag {
        lattice_value_tag::Nil => Value::Nil,
        lattice_value_tag::Boolean => Value::Boolean(v.boolean),
        lattice_value_tag::Number => Value::Number(v.number),
        lattice_value_tag::String => {
            let borrowed = Rc::from_raw(v.pointer.cast::<StrObj>());
            let owned = Rc::clone(&borrowed);
            std::mem::forget(borrowed);
            Value::String(owned)
        }
        lattice_value_tag::LightUserdata => Value::LightUserdata(v.pointer),
        lattice_value_tag::Userdata => {
            let borrowed = Rc::from_raw(v.pointer.cast::<crate::intern::UserData>());
            let owned = Rc::clone(&borrowed);
            std::mem::forget(borrowed);
            Value::Userdata(owned)
        }
        lattice_value_tag::Table => {
            let borrowed = Rc::from_raw(v.pointer.cast::<RefCell<Table>>());
            let owned = Rc::clone(&borrowed);
            std::mem::forget(borrowed);
            Value::Table(owned)
        }
    }
}

fn value_to_c(v: Value) -> lattice_value {
    match v {
        Value::Nil => lattice_value::nil(),
        Value::Boolean(b) => lattice_value {
            tag: lattice_value_tag::Boolean,
            boolean: b,
            number: 0.0,
            pointer: ptr::null_mut(),
        },
        Value::Number(n) => lattice_value {
            tag: lattice_value_tag::Number,
            boolean: false,
            number: n,
            pointer: ptr::null_mut(),
        },
        Value::String(s) => lattice_value {
            tag: lattice_value_tag::String,
            boolean: false,
            number: 0.0,
            pointer: Rc::into_raw(s) as *mut c_void,
        },
        Value::LightUserdata(p) => lattice_value {
            tag: lattice_value_tag::LightUserdata,
            boolean: false,
            number: 0.0,
            pointer: p,
        },
        Value::Userdata(u) => lattice_value {
            tag: lattice_value_tag::Userdata,
            boolean: false,
            number: 0.0,
            pointer: Rc::into_raw(u) as *mut c_void,
        },
        Value::Table(t) => lattice_value {
            tag: lattice_value_tag::Table,
            boolean: false,
            number: 0.0,
            pointer: Rc::into_raw(t) as *mut c_void,
        },
        Value::Function(_) | Value::Thread(_) => lattice_value::nil(),
    }
}

/// Drops the strong reference owned by a `lattice_value` returned from this
/// module, if it carries one (String/Userdata/Table). A no-op for any other
/// tag.
#[no_mangle]
pub unsafe extern "C" fn lattice_value_release(value: lattice_value) {
    match value.tag {
        lattice_value_tag::String => {
            drop(Rc::from_raw(value.pointer.cast::<StrObj>()));
        }
        lattice_value_tag::Userdata => {
            drop(Rc::from_raw(value.pointer.cast::<crate::intern::UserData>()));
        }
        lattice_value_tag::Table => {
            drop(Rc::from_raw(value.pointer.cast::<RefCell<Table>>()));
        }
        _ => {}
    }
}

// ---- table lifecycle ------------------------------------------------------

/// Allocates a table with at least `narray` array slots and room for
/// `nhash` hash entries before the first rehash. Returns null on
/// allocation failure.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_new(narray: libc::size_t, nhash: libc::size_t) -> *mut lattice_table {
    match Table::new(narray as usize, nhash as usize) {
        Ok(table) => Box::into_raw(Box::new(lattice_table(Rc::new(RefCell::new(table))))),
        Err(_) => ptr::null_mut(),
    }
}

/// Releases a table handle obtained from [`lattice_table_new`].
#[no_mangle]
pub unsafe extern "C" fn lattice_table_free(table: *mut lattice_table) {
    if !table.is_null() {
        drop(Box::from_raw(table));
    }
}

// ---- generic get/set -------------------------------------------------------

/// Reads the value at `key`. Returns a nil-tagged value if `table` is null.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_get(table: *const lattice_table, key: lattice_value) -> lattice_value {
    if table.is_null() {
        return lattice_value::nil();
    }
    let key = value_from_c(&key);
    let result = (*table).0.borrow().get(&key);
    value_to_c(result)
}

/// Writes `value` at `key`. Returns `false` if `key` is nil/NaN or if
/// growing the table failed; the table is left unmodified in that case.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_set(
    table: *mut lattice_table,
    key: lattice_value,
    value: lattice_value,
) -> bool {
    if table.is_null() {
        return false;
    }
    let key = value_from_c(&key);
    let value = value_from_c(&value);
    let mut t = (*table).0.borrow_mut();
    match t.set(key) {
        Ok(slot) => {
            *slot = value;
            true
        }
        Err(_) => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn lattice_table_get_integer(table: *const lattice_table, k: i64) -> lattice_value {
    if table.is_null() {
        return lattice_value::nil();
    }
    value_to_c((*table).0.borrow().get_integer(k))
}

#[no_mangle]
pub unsafe extern "C" fn lattice_table_set_integer(table: *mut lattice_table, k: i64, value: lattice_value) {
    if table.is_null() {
        return;
    }
    let value = value_from_c(&value);
    let mut t = (*table).0.borrow_mut();
    *t.set_integer(k) = value;
}

#[no_mangle]
pub unsafe extern "C" fn lattice_table_get_string(
    table: *const lattice_table,
    s: *const lattice_str,
) -> lattice_value {
    if table.is_null() || s.is_null() {
        return lattice_value::nil();
    }
    value_to_c((*table).0.borrow().get_string(&*s))
}

#[no_mangle]
pub unsafe extern "C" fn lattice_table_set_string(
    table: *mut lattice_table,
    s: *const lattice_str,
    value: lattice_value,
) {
    if table.is_null() || s.is_null() {
        return;
    }
    // the borrow is owned by the caller; bump the refcount for storage
    let owned: Rc<StrObj> = Rc::from_raw(s);
    let cloned = Rc::clone(&owned);
    std::mem::forget(owned);
    let value = value_from_c(&value);
    let mut t = (*table).0.borrow_mut();
    *t.set_string(cloned) = value;
}

/// Removes `key`, leaving a dead-key tombstone in the hash region if
/// applicable.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_remove(table: *mut lattice_table, key: lattice_value) {
    if table.is_null() {
        return;
    }
    let key = value_from_c(&key);
    (*table).0.borrow_mut().remove(&key);
}

/// Grows the array region to `n` slots, migrating matching hash-region
/// integer keys into it. Returns `false` on allocation failure.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_resize_array(table: *mut lattice_table, n: libc::size_t) -> bool {
    if table.is_null() {
        return false;
    }
    (*table).0.borrow_mut().resize_array(n as usize).is_ok()
}

/// A border of the table, per the reference length semantics.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_length(table: *const lattice_table) -> libc::size_t {
    if table.is_null() {
        return 0;
    }
    (*table).0.borrow().length() as libc::size_t
}

/// Stateless iteration: given the previous key (nil to start), writes the
/// next key/value pair to `out_key`/`out_value` and returns `true`, or
/// returns `false` once iteration is exhausted or `key` is invalid.
#[no_mangle]
pub unsafe extern "C" fn lattice_table_next(
    table: *const lattice_table,
    key: lattice_value,
    out_key: *mut lattice_value,
    out_value: *mut lattice_value,
) -> bool {
    if table.is_null() {
        return false;
    }
    let key = value_from_c(&key);
    match (*table).0.borrow().next(&key) {
        Ok(Some((k, v))) => {
            if !out_key.is_null() {
                *out_key = value_to_c(k);
            }
            if !out_value.is_null() {
                *out_value = value_to_c(v);
            }
            true
        }
        _ => false,
    }
}

// ---- intern pool -----------------------------------------------------------

#[no_mangle]
pub unsafe extern "C" fn lattice_intern_new() -> *mut lattice_intern {
    Box::into_raw(Box::new(lattice_intern(Intern::new())))
}

#[no_mangle]
pub unsafe extern "C" fn lattice_intern_free(pool: *mut lattice_intern) {
    if !pool.is_null() {
        drop(Box::from_raw(pool));
    }
}

/// Interns `len` bytes starting at `bytes`, returning an owned strong
/// reference the caller must release with [`lattice_str_release`]. Returns
/// null on allocation failure.
#[no_mangle]
pub unsafe extern "C" fn lattice_string_intern(
    pool: *const lattice_intern,
    bytes: *const c_char,
    len: libc::size_t,
) -> *const lattice_str {
    if pool.is_null() {
        return ptr::null();
    }
    let slice = slice::from_raw_parts(bytes.cast::<u8>(), len as usize);
    match (*pool).0.intern(slice) {
        Ok(s) => Rc::into_raw(s),
        Err(_) => ptr::null(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn lattice_str_release(s: *const lattice_str) {
    if !s.is_null() {
        drop(Rc::from_raw(s));
    }
}

#[no_mangle]
pub unsafe extern "C" fn lattice_str_bytes(s: *const lattice_str, out_len: *mut libc::size_t) -> *const c_char {
    if s.is_null() {
        if !out_len.is_null() {
            *out_len = 0;
        }
        return ptr::null();
    }
    let bytes = (*s).as_bytes();
    if !out_len.is_null() {
        *out_len = bytes.len() as libc::size_t;
    }
    bytes.as_ptr().cast::<c_char>()
}

/// Allocates a userdata block of `size` bytes with no environment table,
/// returning an owned strong reference the caller must release with
/// [`lattice_value_release`] after wrapping it in a `Userdata`-tagged value.
#[no_mangle]
pub unsafe extern "C" fn lattice_userdata_new(pool: *const lattice_intern, size: libc::size_t) -> lattice_value {
    if pool.is_null() {
        return lattice_value::nil();
    }
    let ud = (*pool).0.new_userdata(size as usize, None);
    value_to_c(Value::Userdata(ud))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_value_fits_in_two_machine_words_plus_tag() {
        assert!(std::mem::size_of::<lattice_value>() <= std::mem::size_of::<[u64; 3]>());
    }

    #[test]
    fn round_trip_integer_get_set_through_the_c_abi() {
        unsafe {
            let table = lattice_table_new(0, 0);
            assert!(!table.is_null());
            let value = lattice_value {
                tag: lattice_value_tag::Number,
                boolean: false,
                number: 42.0,
                pointer: ptr::null_mut(),
            };
            lattice_table_set_integer(table, 1, value);
            let got = lattice_table_get_integer(table, 1);
            assert_eq!(got.tag, lattice_value_tag::Number);
            assert_eq!(got.number, 42.0);
            lattice_table_free(table);
        }
    }

    #[test]
    fn intern_round_trip_through_the_c_abi() {
        unsafe {
            let pool = lattice_intern_new();
            let s = lattice_string_intern(pool, b"hi".as_ptr().cast(), 2);
            assert!(!s.is_null());
            let mut len = 0usize;
            let ptr = lattice_str_bytes(s, &mut len);
            let bytes = slice::from_raw_parts(ptr.cast::<u8>(), len);
            assert_eq!(bytes, b"hi");
            lattice_str_release(s);
            lattice_intern_free(pool);
        }
    }
}
