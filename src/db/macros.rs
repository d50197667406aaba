//! Declarative helpers for building statement arguments.

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// Anything with a `From` conversion into `QueryParam` is accepted, including
/// `Option<T>` (mapped to NULL when `None`).
///
/// # Example
///
/// ```
/// use mysql_client::params;
/// use mysql_client::models::QueryParam;
///
/// let args = params!["ann", 30, None::<i64>];
/// assert_eq!(args[1], QueryParam::Int(30));
/// assert!(args[2].is_null());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}
