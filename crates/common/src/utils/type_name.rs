//! Type-name helpers for metric tags and error reports

/// Last path segment of `T`'s type name, without generic parameters
///
/// `std::io::Error` becomes `"Error"`, `my_crate::Wrapper<u8>` becomes
/// `"Wrapper"`. The output of [`std::any::type_name`] is not a stable
/// format, so treat the result as a label only.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
