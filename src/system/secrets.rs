//! Secret handling: the normalized string view, random credentials and the
//! server, operator and admin secrets.

use super::System;
use crate::domain::ports::{ClusterClient, CreateAuthParams, CreateSystemParams, ManagementApi};
use crate::error::{Error, ReconcileResult, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Move the binary `data` of a secret into its string view.
///
/// Afterwards `string_data` holds every UTF-8 value and `data` keeps only
/// the values that are not valid UTF-8, byte for byte. Writing the secret
/// lets the API server fold the string view back into `data`.
pub fn secret_reset_string_data_from_data(secret: &mut Secret) {
    let mut string_data = secret.string_data.take().unwrap_or_default();
    let mut binary = BTreeMap::new();
    for (key, value) in secret.data.take().unwrap_or_default() {
        match String::from_utf8(value.0) {
            Ok(text) => {
                string_data.insert(key, text);
            }
            Err(err) => {
                warn!(key = %key, "Secret value is not UTF-8, keeping it binary");
                binary.insert(key, ByteString(err.into_bytes()));
            }
        }
    }
    secret.string_data = Some(string_data);
    secret.data = (!binary.is_empty()).then_some(binary);
}

fn random_bytes(num_bytes: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; num_bytes];
    if let Err(err) = OsRng.try_fill_bytes(&mut bytes) {
        panic!("failed to read from the OS random source: {}", err);
    }
    bytes
}

/// Random bytes encoded as standard base64
pub fn random_base64(num_bytes: usize) -> String {
    STANDARD.encode(random_bytes(num_bytes))
}

/// Random bytes encoded as lowercase hex
pub fn random_hex(num_bytes: usize) -> String {
    random_bytes(num_bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn string_value<'a>(secret: &'a Secret, key: &str) -> &'a str {
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

fn set_string_value(secret: &mut Secret, key: &str, value: String) {
    secret
        .string_data
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value);
}

impl<C: ClusterClient> System<C> {
    /// Refresh a secret from the cluster into its string view.
    ///
    /// Returns whether the secret exists.
    async fn refresh_secret(&self, secret: &mut Secret) -> Result<bool> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let found = self
            .guard(self.ctx.cluster.get::<Secret>(&self.request.namespace, &name))
            .await?;
        let exists = found.is_some();
        if let Some(existing) = found {
            *secret = existing;
        }
        secret_reset_string_data_from_data(secret);
        Ok(exists)
    }

    /// Ensure the secret of the core server exists.
    ///
    /// Missing fields are generated but an existing secret is never written.
    pub(super) async fn reconcile_secret_server(&mut self) -> ReconcileResult<()> {
        let mut secret = self.secret_server.clone();
        let exists = self.refresh_secret(&mut secret).await?;

        if string_value(&secret, "jwt").is_empty() {
            set_string_value(&mut secret, "jwt", random_base64(16));
        }
        if string_value(&secret, "server_secret").is_empty() {
            set_string_value(&mut secret, "server_secret", random_hex(4));
        }

        if !exists {
            self.own(&mut secret.metadata)?;
            info!(name = secret.metadata.name.as_deref(), "Creating server secret");
            secret = self.guard(self.ctx.cluster.create(&secret)).await?;
            secret_reset_string_data_from_data(&mut secret);
        }
        self.secret_server = secret;
        Ok(())
    }

    /// Current operator secret value for `key`
    pub(super) fn secret_op_value(&self, key: &str) -> &str {
        string_value(&self.secret_op, key)
    }

    pub(super) async fn refresh_secret_op(&mut self) -> Result<bool> {
        let mut secret = self.secret_op.clone();
        let exists = self.refresh_secret(&mut secret).await?;
        self.secret_op = secret;
        Ok(exists)
    }

    fn nb(&self) -> Result<&dyn ManagementApi> {
        self.nb_client
            .as_deref()
            .ok_or_else(|| Error::NotReady("management client not connected".to_string()))
    }

    /// Obtain the operator auth token, creating the system when needed.
    ///
    /// A stored token makes this a no-op. The generated password is written
    /// before the first remote call so it cannot be lost.
    pub(super) async fn reconcile_secret_op(&mut self) -> ReconcileResult<()> {
        let mut exists = self.refresh_secret_op().await?;

        if !self.secret_op_value("auth_token").is_empty() {
            return Ok(());
        }

        if self.secret_op_value("email").is_empty() {
            let email = self.config().admin_email.clone();
            set_string_value(&mut self.secret_op, "email", email);
        }

        if self.secret_op_value("password").is_empty() {
            set_string_value(&mut self.secret_op, "password", random_base64(16));
            let mut secret = self.secret_op.clone();
            self.own(&mut secret.metadata)?;
            let written = if exists {
                self.guard(self.ctx.cluster.update(&secret)).await?
            } else {
                self.guard(self.ctx.cluster.create(&secret)).await?
            };
            exists = true;
            self.keep_secret_op(written);
        }

        let email = self.secret_op_value("email").to_string();
        let password = self.secret_op_value("password").to_string();

        let auth = self
            .guard(self.nb()?.create_auth(CreateAuthParams {
                system: self.request.name.clone(),
                role: "admin".to_string(),
                email: email.clone(),
                password: password.clone(),
            }))
            .await;

        let token = match auth {
            // TODO: create_auth does not return an operator_token; switch once the server does
            Ok(reply) => reply.token,
            Err(err) => {
                debug!("Account login failed ({}), creating system", err);
                let reply = self
                    .guard(self.nb()?.create_system(CreateSystemParams {
                        name: self.request.name.clone(),
                        email,
                        password,
                    }))
                    .await?;
                info!(system = %self.request.name, "Created system");
                reply.token
            }
        };

        set_string_value(&mut self.secret_op, "auth_token", token.clone());
        if let Some(client) = self.nb_client.as_mut() {
            client.set_auth_token(&token);
        }

        let mut secret = self.secret_op.clone();
        self.own(&mut secret.metadata)?;
        let written = if exists {
            self.guard(self.ctx.cluster.update(&secret)).await?
        } else {
            self.guard(self.ctx.cluster.create(&secret)).await?
        };
        self.keep_secret_op(written);
        Ok(())
    }

    fn keep_secret_op(&mut self, mut written: Secret) {
        secret_reset_string_data_from_data(&mut written);
        self.secret_op = written;
    }

    /// Create the admin secret once; an existing one is never touched.
    pub(super) async fn reconcile_secret_admin(&mut self) -> ReconcileResult<()> {
        let ns = self.request.namespace.clone();
        let name = self.secret_admin.metadata.name.clone().unwrap_or_default();

        if let Some(mut existing) = self.guard(self.ctx.cluster.get::<Secret>(&ns, &name)).await? {
            secret_reset_string_data_from_data(&mut existing);
            self.secret_admin = existing;
            return Ok(());
        }

        let admin_email = self.config().admin_email.clone();
        let mut secret = Secret {
            metadata: ObjectMeta {
                namespace: Some(ns),
                name: Some(name),
                labels: Some(BTreeMap::from([("app".to_string(), "noobaa".to_string())])),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::from([
                ("system".to_string(), self.request.name.clone()),
                ("email".to_string(), admin_email.clone()),
                ("password".to_string(), self.secret_op_value("password").to_string()),
            ])),
            ..Default::default()
        };

        info!("Listing accounts");
        let accounts = self.guard(self.nb()?.list_accounts()).await?;
        match accounts.accounts.iter().find(|a| a.email == admin_email) {
            Some(account) => {
                if let Some(keys) = account.access_keys.first() {
                    set_string_value(&mut secret, "AWS_ACCESS_KEY_ID", keys.access_key.clone());
                    set_string_value(&mut secret, "AWS_SECRET_ACCESS_KEY", keys.secret_key.clone());
                }
            }
            None => warn!(email = %admin_email, "Admin account not found in account list"),
        }

        self.own(&mut secret.metadata)?;
        let mut created = self.guard(self.ctx.cluster.create(&secret)).await?;
        secret_reset_string_data_from_data(&mut created);
        self.secret_admin = created;
        Ok(())
    }
}
