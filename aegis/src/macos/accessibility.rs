use core_foundation::array::CFArray;
use core_foundation::base::{CFType, CFTypeID, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::{CFString, CFStringRef};
use core_foundation::{declare_TCFType, impl_TCFType};
use std::ffi::c_void;
use std::ptr;

pub type AXError = i32;
pub const AX_ERROR_SUCCESS: AXError = 0;

#[repr(C)]
pub struct __AXUIElement(c_void);
pub type AXUIElementRef = *mut __AXUIElement;

declare_TCFType!(AXUIElement, AXUIElementRef);
impl_TCFType!(AXUIElement, AXUIElementRef, AXUIElementGetTypeID);

// AX elements are CF objects and may be messaged from any thread
unsafe impl Send for AXUIElement {}
unsafe impl Sync for AXUIElement {}

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXUIElementGetTypeID() -> CFTypeID;
    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(options: *const c_void) -> bool;
    fn AXUIElementCreateApplication(pid: i32) -> AXUIElementRef;
    fn AXUIElementCopyAttributeValue(
        element: AXUIElementRef,
        attribute: CFStringRef,
        value: *mut *mut c_void,
    ) -> AXError;
    fn AXUIElementPerformAction(element: AXUIElementRef, action: CFStringRef) -> AXError;
}

mod attr {
    pub const ROLE: &str = "AXRole";
    pub const SUBROLE: &str = "AXSubrole";
    pub const VALUE: &str = "AXValue";
    pub const DESCRIPTION: &str = "AXDescription";
    pub const CHILDREN: &str = "AXChildren";
}

/// Whether this process may install a global input tap.
pub fn is_trusted() -> bool {
    unsafe { AXIsProcessTrusted() }
}

/// Like `is_trusted`, and asks the system to show the grant prompt.
pub fn is_trusted_with_prompt() -> bool {
    let key = CFString::new("AXTrustedCheckOptionPrompt");
    let dict = CFDictionary::from_CFType_pairs(&[(key, CFBoolean::true_value())]);

    unsafe { AXIsProcessTrustedWithOptions(dict.as_concrete_TypeRef() as *const c_void) }
}

impl AXUIElement {
    pub fn application(pid: i32) -> Self {
        unsafe {
            let raw = AXUIElementCreateApplication(pid);
            Self::wrap_under_create_rule(raw)
        }
    }

    fn get_attribute(&self, name: &str) -> Result<*mut c_void, AXError> {
        let attr = CFString::new(name);
        let mut value: *mut c_void = ptr::null_mut();
        let err = unsafe {
            AXUIElementCopyAttributeValue(
                self.as_concrete_TypeRef(),
                attr.as_concrete_TypeRef(),
                &mut value,
            )
        };
        if err == AX_ERROR_SUCCESS && !value.is_null() {
            Ok(value)
        } else {
            Err(err)
        }
    }

    /// String-valued attribute. Values of any other type read as `None`.
    fn string_attribute(&self, name: &str) -> Option<String> {
        let value = self.get_attribute(name).ok()?;
        let value = unsafe { CFType::wrap_under_create_rule(value as *const _) };
        value.downcast::<CFString>().map(|s| s.to_string())
    }

    pub fn role(&self) -> Option<String> {
        self.string_attribute(attr::ROLE)
    }

    pub fn subrole(&self) -> Option<String> {
        self.string_attribute(attr::SUBROLE)
    }

    pub fn value(&self) -> Option<String> {
        self.string_attribute(attr::VALUE)
    }

    pub fn description(&self) -> Option<String> {
        self.string_attribute(attr::DESCRIPTION)
    }

    pub fn children(&self) -> Vec<AXUIElement> {
        let Ok(value) = self.get_attribute(attr::CHILDREN) else {
            return Vec::new();
        };
        let array: CFArray<AXUIElement> =
            unsafe { CFArray::wrap_under_create_rule(value as *const _) };
        array.iter().map(|child| child.clone()).collect()
    }

    pub fn perform_action(&self, action: &str) -> Result<(), AXError> {
        let action = CFString::new(action);
        let err = unsafe {
            AXUIElementPerformAction(self.as_concrete_TypeRef(), action.as_concrete_TypeRef())
        };
        if err == AX_ERROR_SUCCESS {
            Ok(())
        } else {
            Err(err)
        }
    }
}
