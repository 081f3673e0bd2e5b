use std::path::PathBuf;

xflags::xflags! {
    /// Administration tool for the Kerberos single sign-on gate.
    cmd kerberos-sso {
        /// Writes the Kerberos client configuration (`krb5.conf`) for the configured realm.
        cmd provision {
            /// Path to the gate configuration (JSON).
            required --config config: PathBuf

            /// Target directory. Defaults to the `provision.directory` of the configuration.
            optional --directory directory: PathBuf

            /// Replace an existing `krb5.conf`.
            optional --overwrite
        }

        /// Keytab maintenance.
        cmd keytab {
            /// Prints every entry of a keytab. Keys are never printed.
            cmd list {
                required file: PathBuf
            }

            /// Derives AES keys from a password and appends them to a keytab.
            /// The keytab is created if it does not exist.
            cmd add {
                required file: PathBuf

                /// Service principal with realm, e.g. HTTP/www.example.com@EXAMPLE.COM.
                required --principal principal: String

                /// Service account password.
                required --password password: String

                /// Key version number. Defaults to 1.
                optional --kvno kvno: u32

                /// Overrides the default `{REALM}{name components}` salt.
                optional --salt salt: String
            }
        }

        /// Validates the configuration and loads the server credential exactly like the gate does at startup.
        cmd check {
            /// Path to the gate configuration (JSON).
            required --config config: PathBuf
        }
    }
}
