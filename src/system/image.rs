//! Validation of the requested core image

use super::System;
use crate::crd::SystemPhase;
use crate::domain::ports::{AuditEvent, ClusterClient};
use crate::error::{Error, ReconcileError, ReconcileResult};
use crate::image::{ImageReference, Version};
use tracing::{error, info};

impl<C: ClusterClient> System<C> {
    /// Check the image of the spec and record it as the actual image.
    ///
    /// A malformed reference, or a canonical image whose version tag is out
    /// of the supported range, rejects the system until the spec changes.
    /// Anything else is accepted, non-version tags and other image names
    /// as custom images.
    pub(super) async fn check_spec_image(&mut self) -> ReconcileResult<()> {
        let spec_image = self
            .noobaa
            .spec
            .image
            .clone()
            .unwrap_or_else(|| self.config().default_image.clone());

        let image_ref = match ImageReference::parse(&spec_image) {
            Ok(image_ref) => image_ref,
            Err(err) => {
                error!("Invalid image {}: {}", spec_image, err);
                self.publish(AuditEvent::warning(
                    "BadImage",
                    format!("Invalid image requested \"{}\"", spec_image),
                ))
                .await;
                self.set_phase(SystemPhase::Rejected);
                return Err(ReconcileError::persistent(err));
            }
        };

        let canonical = self.config().canonical_image_name.clone();
        let constraint = self.config().image_constraint.clone();

        if image_ref.name == canonical {
            match image_ref.tag.as_deref().map(Version::parse) {
                Some(Ok(version)) => {
                    info!("Parsed version \"{}\" from image tag", version);
                    if !constraint.check(&version) {
                        error!(
                            "Unsupported image version \"{}\" for constraints \"{}\"",
                            image_ref, constraint
                        );
                        self.publish(AuditEvent::warning(
                            "BadImage",
                            format!(
                                "Unsupported image version requested \"{}\" not matching constraints \"{}\"",
                                image_ref, constraint
                            ),
                        ))
                        .await;
                        self.set_phase(SystemPhase::Rejected);
                        return Err(ReconcileError::persistent(Error::UnsupportedImageVersion {
                            image: image_ref.to_string(),
                            constraint: constraint.to_string(),
                        }));
                    }
                }
                _ => {
                    info!("Using custom image \"{}\" constraints \"{}\"", image_ref, constraint);
                    self.publish(AuditEvent::normal(
                        "CustomImage",
                        format!(
                            "Custom image version requested \"{}\", I hope you know what you're doing ...",
                            image_ref
                        ),
                    ))
                    .await;
                }
            }
        } else {
            info!("Using custom image name \"{}\" the default is \"{}\"", image_ref, canonical);
            self.publish(AuditEvent::normal(
                "CustomImage",
                format!(
                    "Custom image requested \"{}\", I hope you know what you're doing ...",
                    image_ref
                ),
            ))
            .await;
        }

        self.status_mut().actual_image = Some(spec_image);
        Ok(())
    }
}
