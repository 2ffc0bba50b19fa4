use core::ffi::CStr;

/// Names the native symbol containing `addr` in our own process. Used to label
/// pcs outside generated code.
pub fn identify(addr: usize) -> Option<&'static CStr> {
    unsafe {
        let mut info: libc::Dl_info = core::mem::zeroed();

        if libc::dladdr(addr as _, &mut info) == 0 {
            return None;
        }

        if !info.dli_sname.is_null() {
            let sym_name = CStr::from_ptr(info.dli_sname);
            return Some(sym_name);
        }

        None
    }
}
