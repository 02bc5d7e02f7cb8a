// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The set of live restorable images and shaders, and the dependency bookkeeping
between them.
*/

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::images::image::RestorableImage;
use crate::images::shader::Shader;

/// Handle to a restorable image owned by an [Engine](super::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub(crate) u64);

/// Handle to a restorable shader owned by an [Engine](super::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub(crate) u64);

impl ImageId {
    /// A number unique among the images of one engine.  Never reused.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl ShaderId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/**
Decides whether an image's contents were derived from another image or a shader.

When a source changes, every image that depends on it becomes stale, because
its contents can no longer be rebuilt from what is recorded.

Answers may be conservative: a false positive only costs a readback at the end
of the frame.  A false negative loses pixels on device loss.
*/
pub trait DependencyTracker: std::fmt::Debug {
    fn depends_on(&self, image: ImageId, target: ImageId) -> bool;

    fn depends_on_shader(&self, image: ImageId, shader: ShaderId) -> bool;

    /**
    Observes a draw onto `dst`.

    Returns whether a dependency was added that did not exist before.
    */
    fn record_draw(&mut self, _dst: ImageId, _srcs: &[ImageId], _shader: ShaderId) -> bool {
        false
    }

    /// Forgets what `image` was drawn from, e.g. once its contents were captured.
    fn forget(&mut self, _image: ImageId) {}

    /// `image` was disposed.  Its id is never reused.
    fn image_removed(&mut self, image: ImageId) {
        self.forget(image);
    }
}

/**
Reports no dependencies at all.

Correct as long as every image is resolved before any of its sources change
again, which holds when sources are only modified between frames.
*/
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDependencies;

impl DependencyTracker for NoDependencies {
    fn depends_on(&self, _image: ImageId, _target: ImageId) -> bool {
        false
    }

    fn depends_on_shader(&self, _image: ImageId, _shader: ShaderId) -> bool {
        false
    }
}

/**
Tracks which sources and shaders were drawn into each image since its contents
were last captured.
*/
#[derive(Debug, Default)]
pub struct DrawSourceDependencies {
    sources: HashMap<ImageId, HashSet<ImageId>>,
    shaders: HashMap<ImageId, HashSet<ShaderId>>,
}

impl DependencyTracker for DrawSourceDependencies {
    fn depends_on(&self, image: ImageId, target: ImageId) -> bool {
        self.sources
            .get(&image)
            .is_some_and(|sources| sources.contains(&target))
    }

    fn depends_on_shader(&self, image: ImageId, shader: ShaderId) -> bool {
        self.shaders
            .get(&image)
            .is_some_and(|shaders| shaders.contains(&shader))
    }

    fn record_draw(&mut self, dst: ImageId, srcs: &[ImageId], shader: ShaderId) -> bool {
        let mut added = false;
        let sources = self.sources.entry(dst).or_default();
        for src in srcs {
            added |= sources.insert(*src);
        }
        added |= self.shaders.entry(dst).or_default().insert(shader);
        added
    }

    fn forget(&mut self, image: ImageId) {
        self.sources.remove(&image);
        self.shaders.remove(&image);
    }

    fn image_removed(&mut self, image: ImageId) {
        self.forget(image);
        for sources in self.sources.values_mut() {
            sources.remove(&image);
        }
    }
}

#[derive(Debug)]
pub(crate) struct ImageRegistry {
    //ordered, so iteration is deterministic
    images: BTreeMap<ImageId, RestorableImage>,
    shaders: BTreeMap<ShaderId, Shader>,
    /// Target of the last invalidation pass; repeating it would find nothing new.
    last_target: Option<ImageId>,
    tracker: Box<dyn DependencyTracker>,
    next_image_id: u64,
    next_shader_id: u64,
}

impl ImageRegistry {
    pub fn new() -> Self {
        ImageRegistry {
            images: BTreeMap::new(),
            shaders: BTreeMap::new(),
            last_target: None,
            tracker: Box::new(NoDependencies),
            next_image_id: 0,
            next_shader_id: 0,
        }
    }

    pub fn set_tracker(&mut self, tracker: Box<dyn DependencyTracker>) {
        self.tracker = tracker;
        self.last_target = None;
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn add(&mut self, image: RestorableImage) -> ImageId {
        let id = ImageId(self.next_image_id);
        self.next_image_id += 1;
        self.images.insert(id, image);
        id
    }

    /**
    Unregisters `id`, invalidating the images that depend on it first.

    # Panics
    If `id` is not registered.
    */
    pub fn remove(&mut self, id: ImageId) -> RestorableImage {
        self.make_stale_if_depending_on(id);
        let Some(image) = self.images.remove(&id) else {
            unreachable!("checked by make_stale_if_depending_on")
        };
        self.tracker.image_removed(id);
        if self.last_target == Some(id) {
            self.last_target = None;
        }
        image
    }

    pub fn add_shader(&mut self, shader: Shader) -> ShaderId {
        let id = ShaderId(self.next_shader_id);
        self.next_shader_id += 1;
        self.shaders.insert(id, shader);
        id
    }

    /// Unregisters `id`, invalidating the images drawn with it first.
    pub fn remove_shader(&mut self, id: ShaderId) -> Shader {
        self.make_stale_if_depending_on_shader(id);
        match self.shaders.remove(&id) {
            Some(shader) => shader,
            None => panic!("restorable: shader {id:?} is disposed or unknown"),
        }
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.images.contains_key(&id)
    }

    pub fn image(&self, id: ImageId) -> &RestorableImage {
        match self.images.get(&id) {
            Some(image) => image,
            None => panic!("restorable: image {id:?} is disposed or unknown"),
        }
    }

    pub fn image_mut(&mut self, id: ImageId) -> &mut RestorableImage {
        match self.images.get_mut(&id) {
            Some(image) => image,
            None => panic!("restorable: image {id:?} is disposed or unknown"),
        }
    }

    pub fn shader(&self, id: ShaderId) -> &Shader {
        match self.shaders.get(&id) {
            Some(shader) => shader,
            None => panic!("restorable: shader {id:?} is disposed or unknown"),
        }
    }

    pub fn image_ids(&self) -> Vec<ImageId> {
        self.images.keys().copied().collect()
    }

    pub fn images(&self) -> impl Iterator<Item = (&ImageId, &RestorableImage)> {
        self.images.iter()
    }

    pub fn images_mut(&mut self) -> impl Iterator<Item = &mut RestorableImage> {
        self.images.values_mut()
    }

    pub fn shaders_mut(&mut self) -> impl Iterator<Item = &mut Shader> {
        self.shaders.values_mut()
    }

    /**
    Marks stale every non-stale image that depends on `target`.

    Called before `target` changes.  Repeated calls for the same target are
    skipped until dependencies may have changed.

    # Panics
    If `target` is not a live image.
    */
    pub fn make_stale_if_depending_on(&mut self, target: ImageId) {
        if !self.images.contains_key(&target) {
            panic!("restorable: target image {target:?} must be a live image");
        }
        if self.last_target == Some(target) {
            return;
        }
        self.last_target = Some(target);
        for (id, image) in self.images.iter_mut() {
            if *id == target || image.is_stale() {
                continue;
            }
            if self.tracker.depends_on(*id, target) {
                logwise::trace_sync!(
                    "image {image} invalidated by a change of {target}",
                    image = id.0,
                    target = target.0
                );
                image.make_stale(None, true);
            }
        }
    }

    /// Marks stale every non-stale image drawn with `shader`.
    pub fn make_stale_if_depending_on_shader(&mut self, shader: ShaderId) {
        for (id, image) in self.images.iter_mut() {
            if image.is_stale() {
                continue;
            }
            if self.tracker.depends_on_shader(*id, shader) {
                image.make_stale(None, true);
            }
        }
    }

    /// Lets the tracker observe a draw onto `dst`.
    pub fn record_draw(&mut self, dst: ImageId, srcs: &[ImageId], shader: ShaderId) {
        if self.tracker.record_draw(dst, srcs, shader) {
            self.last_target = None;
        }
    }

    /// The contents of `id` were captured; what it was drawn from no longer matters.
    pub fn forget_dependencies(&mut self, id: ImageId) {
        self.tracker.forget(id);
    }

    /// Forgets the invalidation memo, e.g. after restoring.
    pub fn reset_last_target(&mut self) {
        self.last_target = None;
    }
}
