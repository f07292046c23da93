// Backend module - Vulkan abstraction layer
//
// Instance -> Surface -> physical device selection -> Device -> Swapchain,
// tied together by Backend. Resource wrappers are reference counted and
// destroy their handle when the last owner drops.

#[allow(clippy::module_inception)]
pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use backend::Backend;
pub use buffer::Buffer;
pub use command::{CommandBuffer, CommandPool};
pub use descriptor::{DescriptorPool, DescriptorSet, DescriptorSetLayout};
pub use device::Device;
pub use image::{Image, ImageDesc, ImageView, Sampler, SamplerDesc};
pub use instance::{Instance, VALIDATION_LAYER};
pub use physical_device::QueueType;
pub use pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout, ShaderModule};
pub use render_pass::{Framebuffer, RenderPass, RenderPassDesc};
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};
