//! Cloud-init bootstrap payload for newly created instances.
//!
//! Existing instance images expect this exact document under the `user-data`
//! metadata key: it creates the remote administrator with passwordless sudo
//! and trusts the key the launcher will later connect with. The rendering is
//! byte-for-byte stable; lines are joined with `\n` and there is no trailing
//! newline.

use crate::keys::SigningKey;
use crate::template::Template;

/// Renders the bootstrap payload for `remote_admin` trusting `fingerprint`.
///
/// The authorized-key entry is written as `<fingerprint>= <remote_admin>`.
///
/// # Examples
///
/// ```
/// use ycfleet::cloud_init::render_bootstrap_payload;
///
/// let payload = render_bootstrap_payload("alice", "AA:BB");
/// assert!(payload.starts_with("#cloud-config\nusers:\n  - name: alice\n"));
/// assert!(payload.ends_with("      - AA:BB= alice"));
/// ```
#[must_use]
pub fn render_bootstrap_payload(remote_admin: &str, fingerprint: &str) -> String {
    format!(
        concat!(
            "#cloud-config\n",
            "users:\n",
            "  - name: {admin}\n",
            "    sudo: ['ALL=(ALL) NOPASSWD:ALL']\n",
            "    ssh-authorized-keys:\n",
            "      - {fingerprint}= {admin}"
        ),
        admin = remote_admin,
        fingerprint = fingerprint,
    )
}

/// Renders the payload for a template, substituting `root` when the template
/// has no remote administrator.
#[must_use]
pub fn bootstrap_payload_for(template: &Template, key: &SigningKey) -> String {
    render_bootstrap_payload(template.effective_remote_admin(), key.public_fingerprint())
}
