/// Returns the provided default value from the enclosing function when the option is `None`.
#[macro_export]
macro_rules! get_or_return_with {
    ($e:expr, $default:expr) => {
        match $e {
            Some(v) => v,
            _ => return $default,
        }
    };
}
