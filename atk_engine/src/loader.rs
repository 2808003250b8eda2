use crate::commands::VoiceId;

pub type LoaderId = usize;

/// Background job held by a [`LoaderManager`] slot.
pub trait Loader: Default {
    /// Advance by one step.
    fn update(&mut self);
    fn is_finished(&self) -> bool;
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fixed pool of loaders split into a free list and an in-use list.
///
/// Loaders are never allocated after construction. Finished loaders go back
/// to the free list during [`update`](Self::update).
pub struct LoaderManager<L: Loader> {
    loaders: Vec<L>,
    free_list: Vec<LoaderId>,
    in_use: Vec<LoaderId>,
}

impl<L: Loader> LoaderManager<L> {
    pub fn new(count: usize) -> Self {
        Self {
            loaders: (0..count).map(|_| L::default()).collect(),
            // Reversed so the lowest id is handed out first
            free_list: (0..count).rev().collect(),
            in_use: Vec::with_capacity(count),
        }
    }

    pub fn acquire(&mut self) -> Option<LoaderId> {
        let id = self.free_list.pop()?;
        self.in_use.push(id);
        Some(id)
    }

    /// Return an in-use loader to the free list without finishing it.
    pub fn release(&mut self, id: LoaderId) -> bool {
        let Some(pos) = self.in_use.iter().position(|&i| i == id) else {
            return false;
        };
        self.in_use.remove(pos);
        self.loaders[id].reset();
        self.free_list.push(id);
        true
    }

    pub fn get(&self, id: LoaderId) -> Option<&L> {
        self.loaders.get(id)
    }

    pub fn get_mut(&mut self, id: LoaderId) -> Option<&mut L> {
        self.loaders.get_mut(id)
    }

    /// Step every in-use loader; report and recycle the ones that finish.
    pub fn update(&mut self, mut on_finished: impl FnMut(LoaderId, &L)) {
        let mut i = 0;
        while i < self.in_use.len() {
            let id = self.in_use[i];
            let loader = &mut self.loaders[id];
            loader.update();
            if loader.is_finished() {
                on_finished(id, loader);
                loader.reset();
                self.in_use.remove(i);
                self.free_list.push(id);
            } else {
                i += 1;
            }
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    pub fn capacity(&self) -> usize {
        self.loaders.len()
    }
}

/// Prefetches the first blocks of a streamed voice, one block per update.
#[derive(Debug, Default, Clone)]
pub struct StreamLoader {
    pub voice: VoiceId,
    pub remaining_blocks: u32,
    pub loaded_blocks: u32,
}

impl StreamLoader {
    pub fn start(&mut self, voice: VoiceId, blocks: u32) {
        self.voice = voice;
        self.remaining_blocks = blocks;
        self.loaded_blocks = 0;
    }
}

impl Loader for StreamLoader {
    fn update(&mut self) {
        if self.remaining_blocks > 0 {
            self.remaining_blocks -= 1;
            self.loaded_blocks += 1;
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining_blocks == 0
    }
}
