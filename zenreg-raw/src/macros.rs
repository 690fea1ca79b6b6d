//! Declarative macros shared by the register tables

/// Define a tag enum with `name()`, `all()` and `from_name()`
///
/// # Example
/// ```
/// use zenreg_raw::named_enum;
///
/// named_enum! {
///     pub enum Bank {
///         Low => "low",
///         High => "high",
///     }
/// }
///
/// assert_eq!(Bank::High.name(), "high");
/// assert_eq!(Bank::from_name("low"), Some(Bank::Low));
/// assert_eq!(Bank::all().len(), 2);
/// ```
///
/// Expands to:
/// - An enum with Debug, Clone, Copy, PartialEq, Eq, Hash derives
/// - A `name(&self) -> &'static str` method
/// - An `all() -> &'static [Self]` method
/// - A case-insensitive `from_name(&str) -> Option<Self>`
#[macro_export]
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant,)*
        }

        impl $name {
            pub const fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> &'static [$name] {
                &[$($name::$variant,)*]
            }

            pub fn from_name(name: &str) -> Option<$name> {
                $name::all()
                    .iter()
                    .copied()
                    .find(|v| v.name().eq_ignore_ascii_case(name))
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}
