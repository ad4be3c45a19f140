//! DACL backend.
//!
//! Reading walks the grant ACEs of the file's DACL and names each SID by
//! comparing it against the well-known SIDs and the process token user.
//! Writing builds one `EXPLICIT_ACCESS_W` per entry, lets
//! `SetEntriesInAclW` allocate the new ACL, and swaps it in with a single
//! `SetNamedSecurityInfoW`. Every SID, ACL, descriptor and token handle is
//! held by a guard from the moment it is allocated.

use std::{
    ffi::c_void,
    fs,
    mem,
    path::Path,
    ptr,
};

use log::{debug, trace, warn};
use windows_sys::Win32::{
    Foundation::{ERROR_INSUFFICIENT_BUFFER, ERROR_SUCCESS, GetLastError},
    Security::{
        ACCESS_ALLOWED_ACE, ACE_HEADER, ACL, AllocateAndInitializeSid,
        DACL_SECURITY_INFORMATION, EqualSid, FreeSid, GetAce, GetSidSubAuthority,
        GetSidSubAuthorityCount, GetTokenInformation, NO_INHERITANCE,
        PROTECTED_DACL_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR, PSID,
        SID_IDENTIFIER_AUTHORITY, TOKEN_QUERY, TOKEN_USER, TokenUser,
        UNPROTECTED_DACL_SECURITY_INFORMATION,
        Authorization::{
            ConvertSidToStringSidW, ConvertStringSidToSidW, EXPLICIT_ACCESS_W,
            GRANT_ACCESS, GetNamedSecurityInfoW, NO_MULTIPLE_TRUSTEE, SE_FILE_OBJECT,
            SetEntriesInAclW, SetNamedSecurityInfoW, TRUSTEE_IS_SID, TRUSTEE_IS_UNKNOWN,
            TRUSTEE_IS_USER, TRUSTEE_IS_WELL_KNOWN_GROUP, TRUSTEE_TYPE, TRUSTEE_W,
        },
    },
    System::Threading::{GetCurrentProcess, OpenProcessToken},
};

use crate::{
    Result, SecurityBackend, StraddleCode, StraddleError,
    guard::{Owned, win},
    perm::{AccessList, NodeInfo, Principal, PrincipalTable},
    types::AccessMask,
};

const ACCESS_ALLOWED_ACE_TYPE: u8 = 0;

const SECURITY_NT_AUTHORITY: SID_IDENTIFIER_AUTHORITY =
    SID_IDENTIFIER_AUTHORITY { Value: [0, 0, 0, 0, 0, 5] };
const SECURITY_WORLD_SID_AUTHORITY: SID_IDENTIFIER_AUTHORITY =
    SID_IDENTIFIER_AUTHORITY { Value: [0, 0, 0, 0, 0, 1] };

const SECURITY_LOCAL_SYSTEM_RID: u32 = 18;
const SECURITY_BUILTIN_DOMAIN_RID: u32 = 32;
const DOMAIN_ALIAS_RID_ADMINS: u32 = 544;
const DOMAIN_ALIAS_RID_USERS: u32 = 545;
const SECURITY_WORLD_RID: u32 = 0;

fn release_sid(sid: PSID) {
    if !sid.is_null() {
        unsafe { FreeSid(sid) };
    }
}

fn alloc_sid(auth: SID_IDENTIFIER_AUTHORITY, subs: &[u32]) -> Result<Owned<PSID>> {
    let mut s = [0u32; 8];
    s[..subs.len()].copy_from_slice(subs);
    let mut sid: PSID = ptr::null_mut();
    let ok = unsafe {
        AllocateAndInitializeSid(
            &auth,
            subs.len() as u8,
            s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
            &mut sid,
        )
    };
    if ok == 0 {
        return Err(StraddleError::last_os_error(
            StraddleCode::ResourceUnavailable,
            "AllocateAndInitializeSid",
        ));
    }
    Ok(Owned::new(sid, release_sid))
}

/// The `TOKEN_USER` of the calling process, in a buffer we own.
pub(crate) struct TokenUserSid {
    // u64 storage keeps the embedded pointers aligned
    buf: Vec<u64>,
}

impl TokenUserSid {
    pub(crate) fn current() -> Result<Self> {
        let mut raw = ptr::null_mut();
        if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut raw) } == 0 {
            return Err(StraddleError::last_os_error(StraddleCode::ResourceUnavailable, "OpenProcessToken"));
        }
        let token = win::handle(raw);

        let mut needed = 0u32;
        let probe = unsafe { GetTokenInformation(token.get(), TokenUser, ptr::null_mut(), 0, &mut needed) };
        if probe == 0 && unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER {
            return Err(StraddleError::last_os_error(StraddleCode::ResourceUnavailable, "GetTokenInformation"));
        }

        let mut buf = vec![0u64; (needed as usize).div_ceil(mem::size_of::<u64>()).max(1)];
        let ok = unsafe {
            GetTokenInformation(
                token.get(),
                TokenUser,
                buf.as_mut_ptr().cast::<c_void>(),
                (buf.len() * mem::size_of::<u64>()) as u32,
                &mut needed,
            )
        };
        if ok == 0 {
            return Err(StraddleError::last_os_error(StraddleCode::ResourceUnavailable, "GetTokenInformation"));
        }
        Ok(Self { buf })
    }

    pub(crate) fn sid(&self) -> PSID {
        let user = self.buf.as_ptr().cast::<TOKEN_USER>();
        unsafe { (*user).User.Sid }
    }

    /// The relative id: the last sub-authority of the user SID.
    pub(crate) fn rid(&self) -> u32 {
        let sid = self.sid();
        unsafe {
            let count = *GetSidSubAuthorityCount(sid);
            if count == 0 {
                return 0;
            }
            *GetSidSubAuthority(sid, u32::from(count) - 1)
        }
    }
}

/// SIDs resolved once per backend call.
struct KnownSids {
    system: Owned<PSID>,
    admins: Owned<PSID>,
    members: Owned<PSID>,
    everyone: Owned<PSID>,
    user: TokenUserSid,
}

impl KnownSids {
    fn resolve() -> Result<Self> {
        Ok(Self {
            system: alloc_sid(SECURITY_NT_AUTHORITY, &[SECURITY_LOCAL_SYSTEM_RID])?,
            admins: alloc_sid(SECURITY_NT_AUTHORITY, &[SECURITY_BUILTIN_DOMAIN_RID, DOMAIN_ALIAS_RID_ADMINS])?,
            members: alloc_sid(SECURITY_NT_AUTHORITY, &[SECURITY_BUILTIN_DOMAIN_RID, DOMAIN_ALIAS_RID_USERS])?,
            everyone: alloc_sid(SECURITY_WORLD_SID_AUTHORITY, &[SECURITY_WORLD_RID])?,
            user: TokenUserSid::current()?,
        })
    }

    fn known(&self) -> [(PSID, Principal); 5] {
        [
            (self.user.sid(), Principal::CurrentUser),
            (self.system.get(), Principal::System),
            (self.admins.get(), Principal::Administrators),
            (self.members.get(), Principal::Members),
            (self.everyone.get(), Principal::Everyone),
        ]
    }

    fn name(&self, sid: PSID) -> Result<Principal> {
        for (known, principal) in self.known() {
            if unsafe { EqualSid(known, sid) } != 0 {
                return Ok(principal);
            }
        }
        let mut text = ptr::null_mut();
        if unsafe { ConvertSidToStringSidW(sid, &mut text) } == 0 {
            return Err(StraddleError::last_os_error(StraddleCode::ResourceUnavailable, "ConvertSidToStringSidW"));
        }
        let text = win::local(text);
        Ok(Principal::Unmapped(unsafe { win::from_wide(text.get()) }))
    }
}

/// A SID for one outgoing entry: borrowed from [`KnownSids`] or
/// converted from its string form and owned here.
enum EntrySid {
    Known(PSID),
    Converted(Owned<*mut c_void>),
}

impl EntrySid {
    fn get(&self) -> PSID {
        match self {
            EntrySid::Known(sid) => *sid,
            EntrySid::Converted(owned) => owned.get(),
        }
    }
}

fn trustee_type(principal: &Principal) -> TRUSTEE_TYPE {
    match principal {
        Principal::CurrentUser => TRUSTEE_IS_USER,
        Principal::Unmapped(_) => TRUSTEE_IS_UNKNOWN,
        _ => TRUSTEE_IS_WELL_KNOWN_GROUP,
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeSecurity {
    table: PrincipalTable,
}

impl NativeSecurity {
    pub fn new() -> Self { Self::default() }

    /// The table is not needed to talk to the DACL; it is kept so both
    /// native backends are built the same way.
    pub fn with_table(table: PrincipalTable) -> Self { Self { table } }

    pub fn table(&self) -> &PrincipalTable { &self.table }

    fn entry_sid(known: &KnownSids, principal: &Principal) -> Result<EntrySid> {
        Ok(match principal {
            Principal::System => EntrySid::Known(known.system.get()),
            Principal::Administrators => EntrySid::Known(known.admins.get()),
            Principal::CurrentUser => EntrySid::Known(known.user.sid()),
            Principal::Members => EntrySid::Known(known.members.get()),
            Principal::Everyone => EntrySid::Known(known.everyone.get()),
            Principal::Unmapped(text) => {
                let mut w = win::wide(text.as_ref())?;
                let mut sid = ptr::null_mut();
                if unsafe { ConvertStringSidToSidW(w.as_mut_ptr(), &mut sid) } == 0 {
                    return Err(StraddleError::last_os_error(
                        StraddleCode::InvalidInput,
                        format_args!("ConvertStringSidToSidW({text})"),
                    ));
                }
                EntrySid::Converted(win::local(sid))
            }
        })
    }
}

impl SecurityBackend for NativeSecurity {
    fn metadata(&self, path: &Path) -> Result<NodeInfo> {
        Ok(NodeInfo::from(&fs::metadata(path)?))
    }

    fn read_access_list(&self, path: &Path) -> Result<AccessList> {
        let mut name = win::wide(path.as_os_str())?;
        let mut dacl: *mut ACL = ptr::null_mut();
        let mut sd: PSECURITY_DESCRIPTOR = ptr::null_mut();

        let status = unsafe {
            GetNamedSecurityInfoW(
                name.as_mut_ptr(),
                SE_FILE_OBJECT,
                DACL_SECURITY_INFORMATION,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut dacl,
                ptr::null_mut(),
                &mut sd,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(StraddleError::status(
                StraddleCode::ResourceUnavailable,
                format_args!("GetNamedSecurityInfoW({})", path.display()),
                status,
            ));
        }
        // dacl points into the descriptor; both go away with this guard
        let _sd = win::local(sd);

        if dacl.is_null() {
            return Err(StraddleError::resource_unavailable(format_args!(
                "{} has no DACL",
                path.display()
            )));
        }

        let known = KnownSids::resolve()?;
        let mut list = AccessList::default();
        let count = unsafe { (*dacl).AceCount };

        for i in 0..u32::from(count) {
            let mut ace: *mut c_void = ptr::null_mut();
            if unsafe { GetAce(dacl, i, &mut ace) } == 0 {
                return Err(StraddleError::last_os_error(
                    StraddleCode::ResourceUnavailable,
                    format_args!("GetAce({i})"),
                ));
            }
            let header = unsafe { &*ace.cast::<ACE_HEADER>() };
            if header.AceType != ACCESS_ALLOWED_ACE_TYPE {
                trace!("skip ACE {i} of type {}", header.AceType);
                continue;
            }
            let allowed = unsafe { &*ace.cast::<ACCESS_ALLOWED_ACE>() };
            let sid: PSID = ptr::addr_of!(allowed.SidStart).cast_mut().cast();
            let principal = known.name(sid)?;
            list.push(principal, AccessMask::from_bits_retain(allowed.Mask));
        }

        Ok(list)
    }

    fn replace_access_list(&self, path: &Path, list: &AccessList, protect: bool) -> Result<()> {
        let mut name = win::wide(path.as_os_str())?;
        let known = KnownSids::resolve()?;

        let sids = list
            .entries
            .iter()
            .map(|e| Self::entry_sid(&known, &e.principal))
            .collect::<Result<Vec<_>>>()?;

        let explicit: Vec<EXPLICIT_ACCESS_W> = list
            .entries
            .iter()
            .zip(&sids)
            .map(|(entry, sid)| EXPLICIT_ACCESS_W {
                grfAccessPermissions: entry.mask.bits(),
                grfAccessMode: GRANT_ACCESS,
                grfInheritance: NO_INHERITANCE,
                Trustee: TRUSTEE_W {
                    pMultipleTrustee: ptr::null_mut(),
                    MultipleTrusteeOperation: NO_MULTIPLE_TRUSTEE,
                    TrusteeForm: TRUSTEE_IS_SID,
                    TrusteeType: trustee_type(&entry.principal),
                    ptstrName: sid.get().cast(),
                },
            })
            .collect();

        let mut acl: *mut ACL = ptr::null_mut();
        let status = unsafe {
            SetEntriesInAclW(explicit.len() as u32, explicit.as_ptr(), ptr::null(), &mut acl)
        };
        if status != ERROR_SUCCESS {
            return Err(StraddleError::status(StraddleCode::ResourceUnavailable, "SetEntriesInAclW", status));
        }
        let acl = win::local(acl);

        let info = DACL_SECURITY_INFORMATION
            | if protect { PROTECTED_DACL_SECURITY_INFORMATION } else { UNPROTECTED_DACL_SECURITY_INFORMATION };

        debug!("SetNamedSecurityInfoW({}) with {} entries", path.display(), explicit.len());
        let status = unsafe {
            SetNamedSecurityInfoW(
                name.as_mut_ptr(),
                SE_FILE_OBJECT,
                info,
                ptr::null_mut(),
                ptr::null_mut(),
                acl.get(),
                ptr::null(),
            )
        };
        if status != ERROR_SUCCESS {
            warn!("SetNamedSecurityInfoW({}) failed with {status}", path.display());
            return Err(StraddleError::status(
                StraddleCode::Io,
                format_args!("SetNamedSecurityInfoW({})", path.display()),
                status,
            ));
        }
        Ok(())
    }

    fn same_principal(&self, a: &Principal, b: &Principal) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let known = KnownSids::resolve()?;
        let a = Self::entry_sid(&known, a)?;
        let b = Self::entry_sid(&known, b)?;
        Ok(unsafe { EqualSid(a.get(), b.get()) } != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perm::PermissionTranslator;
    use crate::types::PermissionMode;

    #[test]
    fn well_known_sids_name_themselves() {
        let known = KnownSids::resolve().unwrap();
        assert_eq!(known.name(known.everyone.get()).unwrap(), Principal::Everyone);
        assert_eq!(known.name(known.members.get()).unwrap(), Principal::Members);
        assert_eq!(known.name(known.user.sid()).unwrap(), Principal::CurrentUser);
    }

    #[test]
    fn unmapped_sid_round_trips_through_text() {
        let known = KnownSids::resolve().unwrap();
        // BUILTIN\Guests
        let guests = Principal::Unmapped("S-1-5-32-546".into());
        let sid = NativeSecurity::entry_sid(&known, &guests).unwrap();
        assert_eq!(known.name(sid.get()).unwrap(), guests);
    }

    #[test]
    fn same_principal_compares_sids() {
        let native = NativeSecurity::new();
        let world = Principal::Unmapped("S-1-1-0".into());
        assert!(native.same_principal(&Principal::Everyone, &world).unwrap());
        assert!(!native.same_principal(&Principal::Members, &Principal::Administrators).unwrap());
    }

    #[test]
    fn native_round_trip_on_a_scratch_file() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("acl.txt");
        fs::write(&file, b"x").unwrap();

        let t = PermissionTranslator::native();
        for bits in [0o640, 0o777, 0o400] {
            let mode = PermissionMode::from_bits_truncate(bits);
            t.apply(&file, mode).unwrap();
            assert_eq!(t.query(&file).unwrap().permissions, t.effective_mode(mode).unwrap());
        }
        t.apply(&file, PermissionMode::ALL_RWX).unwrap();
    }
}
