use std::any;
use std::fmt;
use std::ptr;

use crate::BoundedText;

/// Maximum number of bytes of the source file name stored for each tracked block.
pub const MAX_FILE_LEN: usize = 31;

/// Maximum number of bytes of the function name stored for each tracked block.
pub const MAX_FUNCTION_LEN: usize = 31;

/// Maximum number of bytes of an owner's type name stored for each tracked block.
pub const MAX_OWNER_TYPE_LEN: usize = 63;

/// The source location that requested a tracked operation.
///
/// File and function names longer than [`MAX_FILE_LEN`] and [`MAX_FUNCTION_LEN`] are truncated
/// when the call site is created (see [`BoundedText`] for the exact truncation rules).
///
/// Use [`call_site!`][crate::call_site] to capture the current location, or construct the value
/// by hand when the location comes from elsewhere (e.g. an FFI boundary).
///
/// # Examples
///
/// ```
/// use tracked_alloc::CallSite;
///
/// let call_site = CallSite::new("main.rs", "entry", 20);
///
/// assert_eq!(call_site.file(), "main.rs");
/// assert_eq!(call_site.function(), "entry");
/// assert_eq!(call_site.line(), 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallSite {
    file: BoundedText<MAX_FILE_LEN>,
    function: BoundedText<MAX_FUNCTION_LEN>,
    line: u32,
}

impl CallSite {
    /// Creates a call site, truncating the file and function names if necessary.
    #[must_use]
    pub fn new(file: &str, function: &str, line: u32) -> Self {
        Self {
            file: BoundedText::new(file),
            function: BoundedText::new(function),
            line,
        }
    }

    /// The (possibly truncated) source file name.
    #[must_use]
    pub fn file(&self) -> &str {
        self.file.as_str()
    }

    /// The (possibly truncated) function name.
    #[must_use]
    pub fn function(&self) -> &str {
        self.function.as_str()
    }

    /// The source line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    pub(crate) fn file_text(&self) -> BoundedText<MAX_FILE_LEN> {
        self.file
    }

    pub(crate) fn function_text(&self) -> BoundedText<MAX_FUNCTION_LEN> {
        self.function
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}), line {}", self.file, self.function, self.line)
    }
}

/// Attribution of a tracked block to the object that requested it.
///
/// This is purely informational: it records the owner's address and type name so the leak
/// report can say who allocated a block. It does not keep the owner alive and is never
/// dereferenced.
///
/// # Examples
///
/// ```
/// use tracked_alloc::OwnerRef;
///
/// struct TextureCache;
///
/// let cache = TextureCache;
/// let owner = OwnerRef::of(&cache);
///
/// assert!(owner.type_name().ends_with("TextureCache"));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct OwnerRef {
    address: usize,
    type_name: BoundedText<MAX_OWNER_TYPE_LEN>,
}

impl OwnerRef {
    /// Placeholder stored in block headers that have no owner. Address zero is never produced
    /// by [`OwnerRef::of`] because references are never null.
    pub(crate) const ABSENT: Self = Self {
        address: 0,
        type_name: BoundedText::EMPTY,
    };

    /// Attributes allocations to `owner`.
    #[must_use]
    pub fn of<T: ?Sized>(owner: &T) -> Self {
        Self {
            address: ptr::from_ref(owner).cast::<()>().addr(),
            type_name: BoundedText::new(any::type_name::<T>()),
        }
    }

    /// The owner's address at the time the block was allocated.
    #[must_use]
    pub fn address(&self) -> usize {
        self.address
    }

    /// The (possibly truncated) type name of the owner.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    pub(crate) fn from_stored(stored: Self) -> Option<Self> {
        (stored.address != 0).then_some(stored)
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:#x}", self.type_name, self.address)
    }
}

/// Captures the [`CallSite`] of the place where the macro is expanded.
///
/// The file is recorded as its final path component and the function as the name of the
/// innermost enclosing named function (closures are skipped).
///
/// # Examples
///
/// ```
/// use tracked_alloc::call_site;
///
/// fn load_level() -> tracked_alloc::CallSite {
///     call_site!()
/// }
///
/// let call_site = load_level();
/// assert_eq!(call_site.function(), "load_level");
/// ```
#[macro_export]
macro_rules! call_site {
    () => {{
        fn __here() {}
        let path = ::std::any::type_name_of_val(&__here);
        let path = path.strip_suffix("::__here").unwrap_or(path);
        let function = path
            .rsplit("::")
            .find(|segment| *segment != "{{closure}}")
            .unwrap_or(path);
        let file = file!().rsplit(['/', '\\']).next().unwrap_or(file!());
        $crate::CallSite::new(file, function, line!())
    }};
}
