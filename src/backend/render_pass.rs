// Render passes and framebuffers

use super::image::ImageView;
use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

/// One subpass; references index into `RenderPassDesc::attachments`
#[derive(Debug, Clone, Default)]
pub struct SubpassDesc {
    pub input_attachments: Vec<vk::AttachmentReference>,
    pub color_attachments: Vec<vk::AttachmentReference>,
    pub resolve_attachments: Vec<vk::AttachmentReference>,
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
}

impl SubpassDesc {
    pub fn color(mut self, attachment: u32) -> Self {
        self.color_attachments.push(vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        self
    }

    pub fn input(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.input_attachments.push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn resolve(mut self, attachment: u32) -> Self {
        self.resolve_attachments.push(vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        self
    }

    pub fn depth_stencil(mut self, attachment: u32) -> Self {
        self.depth_stencil_attachment = Some(vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        self
    }

    fn references(&self) -> impl Iterator<Item = &vk::AttachmentReference> {
        self.input_attachments
            .iter()
            .chain(&self.color_attachments)
            .chain(&self.resolve_attachments)
            .chain(&self.depth_stencil_attachment)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassDesc {
    pub fn attachment(mut self, attachment: vk::AttachmentDescription) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn subpass(mut self, subpass: SubpassDesc) -> Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Single subpass writing a presentable color target plus optional depth
    pub fn swapchain(color_format: vk::Format, depth_format: Option<vk::Format>) -> Self {
        let color = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        let mut subpass = SubpassDesc::default().color(0);
        let mut desc = Self::default().attachment(color);

        if let Some(depth_format) = depth_format {
            let depth = vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build();
            desc = desc.attachment(depth);
            subpass = subpass.depth_stencil(1);
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(access)
            .build();

        desc.subpass(subpass).dependency(dependency)
    }

    /// Check every attachment reference points at a declared attachment
    pub fn validate(&self) -> Result<()> {
        if self.subpasses.is_empty() {
            anyhow::bail!("Render pass needs at least one subpass");
        }
        let count = self.attachments.len() as u32;
        for (index, subpass) in self.subpasses.iter().enumerate() {
            if !subpass.resolve_attachments.is_empty()
                && subpass.resolve_attachments.len() != subpass.color_attachments.len()
            {
                anyhow::bail!("Subpass {} resolve count does not match color count", index);
            }
            for reference in subpass.references() {
                if reference.attachment != vk::ATTACHMENT_UNUSED && reference.attachment >= count {
                    anyhow::bail!(
                        "Subpass {} references attachment {} but only {} exist",
                        index,
                        reference.attachment,
                        count
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub desc: RenderPassDesc,
    device: Arc<Device>,
}

impl RenderPass {
    pub fn new(device: &Arc<Device>, desc: RenderPassDesc) -> Result<Arc<Self>> {
        desc.validate()?;

        let subpasses: Vec<vk::SubpassDescription> = desc
            .subpasses
            .iter()
            .map(|subpass| {
                let mut builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .input_attachments(&subpass.input_attachments)
                    .color_attachments(&subpass.color_attachments);
                if !subpass.resolve_attachments.is_empty() {
                    builder = builder.resolve_attachments(&subpass.resolve_attachments);
                }
                if let Some(depth) = &subpass.depth_stencil_attachment {
                    builder = builder.depth_stencil_attachment(depth);
                }
                builder.build()
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&desc.attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);

        let handle = unsafe { device.device.create_render_pass(&create_info, None) }
            .context("Failed to create render pass")?;

        Ok(Arc::new(Self {
            handle,
            desc,
            device: device.clone(),
        }))
    }

    pub fn color_format(&self) -> Option<vk::Format> {
        self.desc.attachments.first().map(|a| a.format)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.handle, None) };
    }
}

pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    pub extent: vk::Extent2D,
    _attachments: Vec<Arc<ImageView>>,
    render_pass: Arc<RenderPass>,
}

impl Framebuffer {
    pub fn new(
        render_pass: &Arc<RenderPass>,
        attachments: Vec<Arc<ImageView>>,
        extent: vk::Extent2D,
        layers: u32,
    ) -> Result<Arc<Self>> {
        if attachments.len() != render_pass.desc.attachments.len() {
            anyhow::bail!(
                "Framebuffer has {} attachments, render pass expects {}",
                attachments.len(),
                render_pass.desc.attachments.len()
            );
        }

        let views: Vec<vk::ImageView> = attachments.iter().map(|v| v.handle).collect();
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers);

        let handle = unsafe {
            render_pass
                .device
                .device
                .create_framebuffer(&create_info, None)
        }
        .context("Failed to create framebuffer")?;

        Ok(Arc::new(Self {
            handle,
            extent,
            _attachments: attachments,
            render_pass: render_pass.clone(),
        }))
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.render_pass
                .device
                .device
                .destroy_framebuffer(self.handle, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_pass_with_depth() {
        let desc = RenderPassDesc::swapchain(vk::Format::B8G8R8A8_SRGB, Some(vk::Format::D32_SFLOAT));
        assert_eq!(desc.attachments.len(), 2);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.subpasses[0].depth_stencil_attachment.map(|d| d.attachment), Some(1));
        assert!(desc.dependencies[0]
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn swapchain_pass_without_depth() {
        let desc = RenderPassDesc::swapchain(vk::Format::B8G8R8A8_UNORM, None);
        assert_eq!(desc.attachments.len(), 1);
        assert!(desc.subpasses[0].depth_stencil_attachment.is_none());
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let desc = RenderPassDesc::default()
            .attachment(vk::AttachmentDescription::default())
            .subpass(SubpassDesc::default().color(0).depth_stencil(1));
        assert!(desc.validate().is_err());
    }

    #[test]
    fn empty_pass_is_rejected() {
        assert!(RenderPassDesc::default().validate().is_err());
    }

    #[test]
    fn resolve_count_must_match_colors() {
        let desc = RenderPassDesc::default()
            .attachment(vk::AttachmentDescription::default())
            .attachment(vk::AttachmentDescription::default())
            .attachment(vk::AttachmentDescription::default())
            .subpass(SubpassDesc::default().color(0).color(1).resolve(2));
        assert!(desc.validate().is_err());
    }
}
