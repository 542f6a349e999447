//! Gallery construction: fetch enrollment stills concurrently, extract
//! one descriptor per usable reference image, assemble the session
//! gallery. The capture loop only ever sees a fully built gallery.

use crate::engine::Vision;
use rollcall_core::types::{EnrolledPerson, Gallery, LabeledDescriptors, ViewAngle};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// A decoded grayscale reference image.
pub struct Still {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Resolves a reference-image location to a decoded still.
pub trait StillFetcher: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Still, FetchError>;
}

/// Reads reference images from the filesystem.
pub struct DiskFetcher;

impl StillFetcher for DiskFetcher {
    fn fetch(&self, location: &str) -> Result<Still, FetchError> {
        let img = image::open(location)?.to_luma8();
        Ok(Still {
            width: img.width(),
            height: img.height(),
            data: img.into_raw(),
        })
    }
}

/// One person's fetched stills, in reference-image order.
pub struct FetchedPerson {
    pub person: EnrolledPerson,
    pub stills: Vec<(ViewAngle, Still)>,
}

/// Fetch every reference image for every person concurrently.
///
/// Results come back in roster order regardless of completion order, so
/// gallery membership never depends on fetch timing. A failed fetch
/// drops that one image; it never aborts the batch.
pub async fn fetch_stills(
    roster: &[EnrolledPerson],
    fetcher: Arc<dyn StillFetcher>,
) -> Vec<FetchedPerson> {
    let mut tasks: JoinSet<(usize, usize, Result<Still, FetchError>)> = JoinSet::new();

    for (person_idx, person) in roster.iter().enumerate() {
        for (image_idx, image) in person.images.iter().enumerate() {
            let fetcher = fetcher.clone();
            let location = image.location.clone();
            tasks.spawn_blocking(move || (person_idx, image_idx, fetcher.fetch(&location)));
        }
    }

    let mut fetched: BTreeMap<usize, BTreeMap<usize, Still>> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let Ok((person_idx, image_idx, result)) = joined else {
            tracing::warn!("reference image fetch task panicked; skipping");
            continue;
        };
        let person = &roster[person_idx];
        let view = person.images[image_idx].view;
        match result {
            Ok(still) => {
                fetched.entry(person_idx).or_default().insert(image_idx, still);
            }
            Err(e) => tracing::warn!(
                person = %person.id,
                view = ?view,
                error = %e,
                "reference image fetch failed; skipping"
            ),
        }
    }

    roster
        .iter()
        .enumerate()
        .map(|(person_idx, person)| {
            let stills = fetched
                .remove(&person_idx)
                .map(|by_image| {
                    by_image
                        .into_iter()
                        .map(|(image_idx, still)| (person.images[image_idx].view, still))
                        .collect()
                })
                .unwrap_or_default();
            FetchedPerson {
                person: person.clone(),
                stills,
            }
        })
        .collect()
}

/// Extract descriptors from the fetched stills and assemble the gallery.
///
/// A still with no detectable face is skipped; a person whose stills all
/// fail is omitted entirely, so the gallery never carries an empty
/// descriptor set.
pub fn assemble_gallery(fetched: &[FetchedPerson], vision: &mut dyn Vision) -> Gallery {
    let mut gallery = Gallery::new();

    for entry in fetched {
        let mut descriptors = Vec::new();

        for (view, still) in &entry.stills {
            match vision.descriptor_from_still(&still.data, still.width, still.height) {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => tracing::debug!(
                    person = %entry.person.id,
                    view = ?view,
                    "no face in reference image; skipping"
                ),
                Err(e) => tracing::warn!(
                    person = %entry.person.id,
                    view = ?view,
                    error = %e,
                    "descriptor extraction failed; skipping"
                ),
            }
        }

        let descriptor_count = descriptors.len();
        match LabeledDescriptors::new(&entry.person.id, &entry.person.label, descriptors) {
            Some(set) => {
                tracing::debug!(
                    person = %entry.person.id,
                    descriptors = descriptor_count,
                    "person enrolled in session gallery"
                );
                gallery.insert(set);
            }
            None => tracing::warn!(
                person = %entry.person.id,
                "no usable reference image; omitted from gallery"
            ),
        }
    }

    gallery
}
