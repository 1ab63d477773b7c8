//! Default-endpoint switching through the policy config client.
//!
//! MMDevice has no public setter for the default endpoint, so this goes
//! through the `IPolicyConfig` interface the Sound control panel uses.

use windows::core::*;
use windows::Win32::Media::Audio::{eCommunications, eConsole, ERole};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

/// Roles switched together; eMultimedia follows eConsole on current Windows.
const SWITCHED_ROLES: [ERole; 2] = [eConsole, eCommunications];

#[interface("F8679F50-850A-41CF-9C72-430F290290C8")]
unsafe trait IPolicyConfig: IUnknown {
    // Format and effect methods we never call; declared for vtable layout only.
    fn get_mix_format(&self) -> HRESULT;
    fn get_device_format(&self) -> HRESULT;
    fn reset_device_format(&self) -> HRESULT;
    fn set_device_format(&self) -> HRESULT;
    fn get_processing_period(&self) -> HRESULT;
    fn set_processing_period(&self) -> HRESULT;
    fn get_share_mode(&self) -> HRESULT;
    fn set_share_mode(&self) -> HRESULT;
    fn get_property_value(&self) -> HRESULT;
    fn set_property_value(&self) -> HRESULT;

    fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: ERole) -> HRESULT;
}

/// Make the endpoint the default for every switched role. The endpoint's
/// own data flow decides which direction changes.
///
/// `device_id` must be nul-terminated.
pub fn set_default_endpoint(device_id: &[u16]) -> Result<()> {
    debug_assert_eq!(device_id.last(), Some(&0));

    unsafe {
        let policy: IPolicyConfig = CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)?;
        for role in SWITCHED_ROLES {
            policy.SetDefaultEndpoint(PCWSTR(device_id.as_ptr()), role).ok()?;
        }
    }
    Ok(())
}
