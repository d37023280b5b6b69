//! Routing table of the channel.

use crate::error::ServiceError;

use std::fmt;
use std::str::FromStr;

/// Routing table entry: `init` builds a session, everything else runs on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Init,
    Session(SessionMethod),
}

/// Command addressed to an initialized instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMethod {
    GetIdentity,
    HasLocalPrivateKey,
    Register,
    RotatePrivateKey,
    CleanUp,
    FindUsers,
    Encrypt,
    Decrypt,
    BackupPrivateKey,
    ResetPrivateKeyBackup,
    ChangePassword,
    RestorePrivateKey,
    Unregister,
    CreateRatchetChannel,
    JoinRatchetChannel,
    HasRatchetChannel,
    GetRatchetChannel,
    DeleteRatchetChannel,
    RatchetEncrypt,
    RatchetDecrypt,
    RatchetDecryptMultiple,
    /// Drops the instance from the registry.
    Dispose,
}

impl Method {
    pub const ALL: [Method; 23] = [
        Method::Init,
        Method::Session(SessionMethod::GetIdentity),
        Method::Session(SessionMethod::HasLocalPrivateKey),
        Method::Session(SessionMethod::Register),
        Method::Session(SessionMethod::RotatePrivateKey),
        Method::Session(SessionMethod::CleanUp),
        Method::Session(SessionMethod::FindUsers),
        Method::Session(SessionMethod::Encrypt),
        Method::Session(SessionMethod::Decrypt),
        Method::Session(SessionMethod::BackupPrivateKey),
        Method::Session(SessionMethod::ResetPrivateKeyBackup),
        Method::Session(SessionMethod::ChangePassword),
        Method::Session(SessionMethod::RestorePrivateKey),
        Method::Session(SessionMethod::Unregister),
        Method::Session(SessionMethod::CreateRatchetChannel),
        Method::Session(SessionMethod::JoinRatchetChannel),
        Method::Session(SessionMethod::HasRatchetChannel),
        Method::Session(SessionMethod::GetRatchetChannel),
        Method::Session(SessionMethod::DeleteRatchetChannel),
        Method::Session(SessionMethod::RatchetEncrypt),
        Method::Session(SessionMethod::RatchetDecrypt),
        Method::Session(SessionMethod::RatchetDecryptMultiple),
        Method::Session(SessionMethod::Dispose),
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Init => "init",
            Method::Session(method) => method.as_str(),
        }
    }
}

impl SessionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMethod::GetIdentity => "getIdentity",
            SessionMethod::HasLocalPrivateKey => "hasLocalPrivateKey",
            SessionMethod::Register => "register",
            SessionMethod::RotatePrivateKey => "rotatePrivateKey",
            SessionMethod::CleanUp => "cleanUp",
            SessionMethod::FindUsers => "findUsers",
            SessionMethod::Encrypt => "encrypt",
            SessionMethod::Decrypt => "decrypt",
            SessionMethod::BackupPrivateKey => "backupPrivateKey",
            SessionMethod::ResetPrivateKeyBackup => "resetPrivateKeyBackup",
            SessionMethod::ChangePassword => "changePassword",
            SessionMethod::RestorePrivateKey => "restorePrivateKey",
            SessionMethod::Unregister => "unregister",
            SessionMethod::CreateRatchetChannel => "createRatchetChannel",
            SessionMethod::JoinRatchetChannel => "joinRatchetChannel",
            SessionMethod::HasRatchetChannel => "hasRatchetChannel",
            SessionMethod::GetRatchetChannel => "getRatchetChannel",
            SessionMethod::DeleteRatchetChannel => "deleteRatchetChannel",
            SessionMethod::RatchetEncrypt => "ratchetEncrypt",
            SessionMethod::RatchetDecrypt => "ratchetDecrypt",
            SessionMethod::RatchetDecryptMultiple => "ratchetDecryptMultiple",
            SessionMethod::Dispose => "dispose",
        }
    }
}

impl FromStr for Method {
    type Err = ServiceError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|method| method.as_str() == name)
            .ok_or_else(|| ServiceError::MethodNotRecognized {
                method: name.to_string(),
            })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
    }

    #[test]
    fn test_only_init_skips_the_session() {
        assert_eq!("init".parse::<Method>().unwrap(), Method::Init);
        assert_eq!(
            "dispose".parse::<Method>().unwrap(),
            Method::Session(SessionMethod::Dispose)
        );
        let session_methods = Method::ALL
            .iter()
            .filter(|method| matches!(method, Method::Session(_)))
            .count();
        assert_eq!(session_methods, Method::ALL.len() - 1);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert!(matches!(
            "Encrypt".parse::<Method>(),
            Err(ServiceError::MethodNotRecognized { method }) if method == "Encrypt"
        ));
    }
}
