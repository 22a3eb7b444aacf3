//! Credential buffers that are wiped after use.

use std::hint::black_box;

/// Transient access or verify code.
///
/// The buffer is overwritten with zeros by [`Credential::wipe`] and again
/// on drop, so the value cannot outlive the scope that sends it.
pub struct Credential {
    bytes: Vec<u8>,
}

impl Credential {
    /// Take ownership of `secret` without copying it.
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self {
            bytes: secret.into_bytes(),
        }
    }

    /// The secret bytes, for transmission only.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite the buffer and forget its length.
    pub fn wipe(&mut self) {
        self.bytes.fill(0);
        black_box(&mut self.bytes);
        self.bytes.clear();
    }

    /// True once the buffer holds nothing readable.
    #[must_use]
    pub fn is_wiped(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self::new(secret.to_string())
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Wipes the borrowed credential when dropped.
///
/// Hold one of these across every await that touches the secret so that
/// errors, early returns and cancelled futures all end in a wipe.
pub struct WipeGuard<'a>(&'a mut Credential);

impl<'a> WipeGuard<'a> {
    #[must_use]
    pub fn new(credential: &'a mut Credential) -> Self {
        Self(credential)
    }

    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose()
    }

    /// Reborrow the guarded credential for a nested send.
    pub fn credential(&mut self) -> &mut Credential {
        self.0
    }
}

impl Drop for WipeGuard<'_> {
    fn drop(&mut self) {
        self.0.wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let code = Credential::from("SECRET1!");
        assert_eq!(format!("{code:?}"), "Credential(<redacted>)");
    }

    #[test]
    fn test_guard_wipes_on_early_return() {
        fn send(code: &mut Credential, fail: bool) -> Result<usize, ()> {
            let guard = WipeGuard::new(code);
            if fail {
                return Err(());
            }
            Ok(guard.expose().len())
        }

        let mut code = Credential::from("abc123");
        assert_eq!(send(&mut code, false), Ok(6));
        assert!(code.is_wiped());

        let mut code = Credential::from("abc123");
        assert_eq!(send(&mut code, true), Err(()));
        assert!(code.is_wiped());
    }
}
