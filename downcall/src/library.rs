//! Resolving native function addresses by symbol name.

use std::ffi::CString;

use log::debug;

use crate::error::LibraryError;

/// Anything that can turn a symbol name into a function address.
pub trait AddressResolver {
    fn resolve(&self, symbol: &str) -> Result<usize, LibraryError>;
}

/// An open dynamic library, closed on drop.
#[derive(Debug)]
pub struct Library {
    handle: *mut libc::c_void,
    name: String,
}

// SAFETY: loader handles are process-global and the loader's entry points
// are thread-safe
unsafe impl Send for Library {}
// SAFETY: see above
unsafe impl Sync for Library {}

fn c_string(name: &str) -> Result<CString, LibraryError> {
    CString::new(name).map_err(|_| LibraryError::InvalidName {
        name: name.to_string(),
    })
}

impl Library {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(target_family = "unix")]
fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a nul-terminated thread-local string
    unsafe {
        let message = libc::dlerror();
        if message.is_null() {
            "unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(message)
                .to_string_lossy()
                .into_owned()
        }
    }
}

#[cfg(target_family = "unix")]
impl Library {
    pub fn open(path: &str) -> Result<Self, LibraryError> {
        let cstr = c_string(path)?;
        // SAFETY: cstr is a valid nul-terminated path
        let handle = unsafe { libc::dlopen(cstr.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(LibraryError::OpenFailed {
                path: path.to_string(),
                message: last_dl_error(),
            });
        }
        debug!("opened library {path}");
        Ok(Self {
            handle,
            name: path.to_string(),
        })
    }

    /// The running executable and every library it already loaded,
    /// including the C runtime.
    pub fn this_process() -> Result<Self, LibraryError> {
        // SAFETY: a null filename asks for the main program handle
        let handle =
            unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(LibraryError::OpenFailed {
                path: "<process>".to_string(),
                message: last_dl_error(),
            });
        }
        Ok(Self {
            handle,
            name: "<process>".to_string(),
        })
    }

    pub fn symbol(&self, name: &str) -> Result<usize, LibraryError> {
        let cstr = c_string(name)?;
        // SAFETY: handle is open for the lifetime of self
        let address = unsafe { libc::dlsym(self.handle, cstr.as_ptr()) };
        if address.is_null() {
            return Err(LibraryError::SymbolNotFound {
                name: name.to_string(),
            });
        }
        Ok(address as usize)
    }
}

#[cfg(target_family = "unix")]
impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: handle came from dlopen and is closed exactly once
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

#[cfg(target_os = "windows")]
unsafe extern "system" {
    fn LoadLibraryA(name: *const libc::c_char) -> *mut libc::c_void;
    fn GetProcAddress(
        module: *mut libc::c_void,
        name: *const libc::c_char,
    ) -> *mut libc::c_void;
    fn FreeLibrary(module: *mut libc::c_void) -> i32;
}

#[cfg(target_os = "windows")]
impl Library {
    pub fn open(path: &str) -> Result<Self, LibraryError> {
        let cstr = c_string(path)?;
        // SAFETY: cstr is a valid nul-terminated path
        let handle = unsafe { LoadLibraryA(cstr.as_ptr()) };
        if handle.is_null() {
            return Err(LibraryError::OpenFailed {
                path: path.to_string(),
                message: std::io::Error::last_os_error().to_string(),
            });
        }
        debug!("opened library {path}");
        Ok(Self {
            handle,
            name: path.to_string(),
        })
    }

    /// The C runtime of the running process.
    pub fn this_process() -> Result<Self, LibraryError> {
        Self::open("msvcrt.dll")
    }

    pub fn symbol(&self, name: &str) -> Result<usize, LibraryError> {
        let cstr = c_string(name)?;
        // SAFETY: handle is open for the lifetime of self
        let address = unsafe { GetProcAddress(self.handle, cstr.as_ptr()) };
        if address.is_null() {
            return Err(LibraryError::SymbolNotFound {
                name: name.to_string(),
            });
        }
        Ok(address as usize)
    }
}

#[cfg(target_os = "windows")]
impl Drop for Library {
    fn drop(&mut self) {
        // SAFETY: handle came from LoadLibraryA and is freed exactly once
        unsafe {
            FreeLibrary(self.handle);
        }
    }
}

#[cfg(not(any(target_family = "unix", target_os = "windows")))]
impl Library {
    pub fn open(_path: &str) -> Result<Self, LibraryError> {
        Err(LibraryError::Unsupported)
    }

    pub fn this_process() -> Result<Self, LibraryError> {
        Err(LibraryError::Unsupported)
    }

    pub fn symbol(&self, _name: &str) -> Result<usize, LibraryError> {
        Err(LibraryError::Unsupported)
    }
}

impl AddressResolver for Library {
    fn resolve(&self, symbol: &str) -> Result<usize, LibraryError> {
        self.symbol(symbol)
    }
}
