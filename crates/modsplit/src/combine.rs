use std::path::PathBuf;

/// Merging of configuration layers.
pub trait Combine {
    /// Merge two layers, keeping the value from `self` wherever both set one.
    ///
    /// Lists are not concatenated: a layer that sets a list replaces the
    /// whole list of every layer below it.
    #[must_use]
    fn combine(self, other: Self) -> Self;
}

macro_rules! impl_combine_or {
    ($($name:ty),* $(,)?) => {
        $(
            impl Combine for Option<$name> {
                fn combine(self, other: Option<$name>) -> Option<$name> {
                    self.or(other)
                }
            }
        )*
    };
}

impl_combine_or!(String, bool, usize, PathBuf);

impl<T> Combine for Option<Vec<T>> {
    fn combine(self, other: Option<Vec<T>>) -> Option<Vec<T>> {
        self.or(other)
    }
}
