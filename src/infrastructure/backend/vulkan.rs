/// Vulkanバックエンドアダプタ
///
/// IUnityGraphicsVulkan経由でUnityのVkDevice/コマンドバッファを借用し、
/// レンダーターゲットをホスト可視のステージングバッファへコピーする。
///
/// # 完了検出
/// Unityの`UnityVulkanRecordingState`が持つ`safe_frame_number`を
/// フェンスとして使用する。フレームNで記録したコピーは、後続の
/// イベントで`safe_frame_number >= N`になった時点で完了が保証される。
/// 追加のVkFenceを作らず、ポーリングのみで完了を検出できる。
///
/// # リソース解放
/// タイムアウト等でin-flight中に放棄された転送のバッファは、GPUが
/// まだ参照している可能性があるため即時破棄せず、`safe_frame_number`が
/// 追いつくまで破棄待ちリストに置く。アダプタのDrop時（プラグイン
/// アンロード）のみ`vkDeviceWaitIdle`で排出してから全リソースを解放する。

use crate::domain::{
    BackendKind, GraphicsBackendPort, InterceptorError, InterceptorResult, PixelFormat,
    RenderTargetHandle, TargetDesc,
};
use crate::infrastructure::unity::{
    IUnityGraphicsVulkan, UnityVulkanImage, UnityVulkanInstance, UnityVulkanRecordingState,
    K_UNITY_VULKAN_GRAPHICS_QUEUE_ACCESS_DONT_CARE,
    K_UNITY_VULKAN_RESOURCE_ACCESS_OBSERVE_ONLY, K_UNITY_VULKAN_RESOURCE_ACCESS_PIPELINE_BARRIER,
    UNITY_VULKAN_WHOLE_IMAGE,
};
use ash::vk;
use std::mem::MaybeUninit;

/// ホスト可視ステージングバッファ（永続マップ済み）
struct StagingBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: vk::DeviceSize,
}

/// 発行済みコピーの状態
struct PendingCopy {
    desc: TargetDesc,
    /// 記録時点のフレーム番号（safe_frame_numberと比較するフェンス値）
    fence_frame: u64,
}

#[derive(Default)]
struct SlotState {
    staging: Option<StagingBuffer>,
    pending: Option<PendingCopy>,
}

/// Vulkanバックエンドアダプタ
pub struct VulkanBackendAdapter {
    vk_if: *mut IUnityGraphicsVulkan,
    unity: UnityVulkanInstance,
    instance: ash::Instance,
    device: ash::Device,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    slots: Vec<SlotState>,
    /// GPUが参照中の可能性がある破棄待ちバッファ
    graveyard: Vec<(StagingBuffer, u64)>,
}

// 生ポインタを含むがレンダースレッド上でのみ使用される契約。
// グローバルコンテキストへ格納するためSendを実装する。
unsafe impl Send for VulkanBackendAdapter {}

impl VulkanBackendAdapter {
    /// 新しいVulkanバックエンドアダプタを作成
    ///
    /// # Arguments
    /// - `vk_if`: `IUnityInterfaces::get_interface`で取得したIUnityGraphicsVulkan
    /// - `ring_depth`: スロット数（ReadbackEngineのリング深さと一致させる）
    ///
    /// # Safety
    /// `vk_if`はプラグインのライフタイム中有効なポインタであること。
    pub unsafe fn new(
        vk_if: *mut IUnityGraphicsVulkan,
        ring_depth: usize,
    ) -> InterceptorResult<Self> {
        if vk_if.is_null() {
            return Err(InterceptorError::Initialization(
                "IUnityGraphicsVulkan interface is null".to_string(),
            ));
        }

        let unity = ((*vk_if).instance)();
        if unity.device == vk::Device::null() {
            return Err(InterceptorError::Initialization(
                "Unity Vulkan device is not available yet".to_string(),
            ));
        }

        // Unityから渡されたget_instance_proc_addrで関数テーブルをロードする。
        // インスタンス・デバイスの所有権はUnity側にあり、破棄しない
        let static_fn = ash::StaticFn {
            get_instance_proc_addr: unity.get_instance_proc_addr,
        };
        let instance = ash::Instance::load(&static_fn, unity.instance);
        let device = ash::Device::load(instance.fp_v1_0(), unity.device);
        let memory_props = instance.get_physical_device_memory_properties(unity.physical_device);

        Ok(Self {
            vk_if,
            unity,
            instance,
            device,
            memory_props,
            slots: (0..ring_depth).map(|_| SlotState::default()).collect(),
            graveyard: Vec::new(),
        })
    }

    /// VkFormatを出力フォーマットへマッピング
    fn map_format(format: vk::Format) -> Option<PixelFormat> {
        match format {
            vk::Format::B8G8R8A8_UNORM => Some(PixelFormat::Bgra8),
            vk::Format::B8G8R8A8_SRGB => Some(PixelFormat::Bgra8Srgb),
            vk::Format::R8G8B8A8_UNORM => Some(PixelFormat::Rgba8),
            vk::Format::R8G8B8A8_SRGB => Some(PixelFormat::Rgba8Srgb),
            _ => None,
        }
    }

    /// 現在のコマンド記録状態を取得
    fn recording_state(&self) -> InterceptorResult<UnityVulkanRecordingState> {
        let mut state = MaybeUninit::<UnityVulkanRecordingState>::zeroed();
        let ok = unsafe {
            ((*self.vk_if).command_recording_state)(
                state.as_mut_ptr(),
                K_UNITY_VULKAN_GRAPHICS_QUEUE_ACCESS_DONT_CARE,
            )
        };
        if ok {
            Ok(unsafe { state.assume_init() })
        } else {
            Err(InterceptorError::Other(
                "Vulkan command recording state unavailable".to_string(),
            ))
        }
    }

    /// レンダーバッファのVkImage情報を取得
    ///
    /// マルチサンプルターゲットの場合はresolveテクスチャ側を参照する。
    fn acquire_image(
        &self,
        handle: &RenderTargetHandle,
        access_mode: u32,
        layout: vk::ImageLayout,
        stage: vk::PipelineStageFlags,
        access: vk::AccessFlags,
    ) -> InterceptorResult<UnityVulkanImage> {
        let mut image = MaybeUninit::<UnityVulkanImage>::zeroed();
        let ok = unsafe {
            ((*self.vk_if).access_render_buffer_texture)(
                handle.as_ptr(),
                UNITY_VULKAN_WHOLE_IMAGE,
                layout,
                stage,
                access,
                access_mode,
                image.as_mut_ptr(),
            )
        };
        if !ok {
            return Err(InterceptorError::InvalidHandle(
                "access_render_buffer_texture rejected the handle".to_string(),
            ));
        }
        let image = unsafe { image.assume_init() };

        if image.samples != vk::SampleCountFlags::TYPE_1 {
            // MSAAターゲットは解決済みイメージからコピーする
            let mut resolved = MaybeUninit::<UnityVulkanImage>::zeroed();
            let ok = unsafe {
                ((*self.vk_if).access_render_buffer_resolve_texture)(
                    handle.as_ptr(),
                    UNITY_VULKAN_WHOLE_IMAGE,
                    layout,
                    stage,
                    access,
                    access_mode,
                    resolved.as_mut_ptr(),
                )
            };
            if !ok {
                return Err(InterceptorError::UnsupportedFormat(
                    "multisampled render target without resolve texture".to_string(),
                ));
            }
            return Ok(unsafe { resolved.assume_init() });
        }

        Ok(image)
    }

    /// type_bitsと要求プロパティを満たすメモリタイプを検索
    fn find_memory_type(
        &self,
        type_bits: u32,
        props: vk::MemoryPropertyFlags,
    ) -> InterceptorResult<u32> {
        for i in 0..self.memory_props.memory_type_count {
            let supported = type_bits & (1u32 << i) != 0;
            if supported && self.memory_props.memory_types[i as usize]
                .property_flags
                .contains(props)
            {
                return Ok(i);
            }
        }
        Err(InterceptorError::Initialization(
            "no host-visible coherent memory type available".to_string(),
        ))
    }

    /// ステージングバッファを作成（HOST_VISIBLE | HOST_COHERENT、永続マップ）
    fn create_staging(&self, size: vk::DeviceSize) -> InterceptorResult<StagingBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| InterceptorError::Other(format!("vkCreateBuffer failed: {:?}", e)))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type = match self.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(idx) => idx,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(InterceptorError::Other(format!(
                    "vkAllocateMemory failed: {:?}",
                    e
                )));
            }
        };

        let bind_and_map = || -> Result<*mut u8, vk::Result> {
            unsafe {
                self.device.bind_buffer_memory(buffer, memory, 0)?;
                let mapped = self.device.map_memory(
                    memory,
                    0,
                    vk::WHOLE_SIZE,
                    vk::MemoryMapFlags::empty(),
                )?;
                Ok(mapped as *mut u8)
            }
        };

        match bind_and_map() {
            Ok(mapped) => Ok(StagingBuffer {
                buffer,
                memory,
                mapped,
                size,
            }),
            Err(e) => {
                unsafe {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                }
                Err(InterceptorError::Other(format!(
                    "staging buffer setup failed: {:?}",
                    e
                )))
            }
        }
    }

    fn destroy_staging(&self, staging: StagingBuffer) {
        unsafe {
            self.device.unmap_memory(staging.memory);
            self.device.destroy_buffer(staging.buffer, None);
            self.device.free_memory(staging.memory, None);
        }
    }

    /// GPUが追い越した破棄待ちバッファを実際に解放
    fn drain_graveyard(&mut self, safe_frame: u64) {
        let mut retained = Vec::new();
        for (staging, fence_frame) in self.graveyard.drain(..) {
            if safe_frame >= fence_frame {
                unsafe {
                    self.device.unmap_memory(staging.memory);
                    self.device.destroy_buffer(staging.buffer, None);
                    self.device.free_memory(staging.memory, None);
                }
            } else {
                retained.push((staging, fence_frame));
            }
        }
        self.graveyard = retained;
    }
}

impl GraphicsBackendPort for VulkanBackendAdapter {
    fn describe_target(&mut self, handle: &RenderTargetHandle) -> InterceptorResult<TargetDesc> {
        // ObserveOnlyではレイアウト遷移もバリアも発生しない
        let image = self.acquire_image(
            handle,
            K_UNITY_VULKAN_RESOURCE_ACCESS_OBSERVE_ONLY,
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags::empty(),
            vk::AccessFlags::empty(),
        )?;

        let format = Self::map_format(image.format).ok_or_else(|| {
            InterceptorError::UnsupportedFormat(format!("VkFormat {:?}", image.format))
        })?;

        Ok(TargetDesc::new(image.extent.width, image.extent.height, format))
    }

    fn issue_copy(
        &mut self,
        handle: &RenderTargetHandle,
        slot: usize,
        desc: &TargetDesc,
    ) -> InterceptorResult<()> {
        let state = self.recording_state()?;
        self.drain_graveyard(state.safe_frame_number);

        // コピーはレンダーパス外でのみ記録できる
        unsafe { ((*self.vk_if).ensure_outside_render_pass)() };

        let image = self.acquire_image(
            handle,
            K_UNITY_VULKAN_RESOURCE_ACCESS_PIPELINE_BARRIER,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        )?;

        // スロットのステージングを確保（サイズ不足時のみ作り直し）
        let needed = desc.byte_size() as vk::DeviceSize;
        let recreate = match &self.slots[slot].staging {
            Some(staging) => staging.size < needed,
            None => true,
        };
        if recreate {
            if let Some(old) = self.slots[slot].staging.take() {
                // 直前の利用は完了確認済みなので即時破棄してよい
                self.destroy_staging(old);
            }
            self.slots[slot].staging = Some(self.create_staging(needed)?);
        }
        let staging = self.slots[slot].staging.as_ref().expect("staging ensured");

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            });

        unsafe {
            self.device.cmd_copy_image_to_buffer(
                state.command_buffer,
                image.image,
                image.layout,
                staging.buffer,
                &[region],
            );
        }

        self.slots[slot].pending = Some(PendingCopy {
            desc: *desc,
            fence_frame: state.current_frame_number,
        });
        Ok(())
    }

    fn poll_completion(&mut self, slot: usize) -> InterceptorResult<bool> {
        let Some(pending) = &self.slots[slot].pending else {
            return Err(InterceptorError::Other(format!(
                "poll on slot {} with no pending copy",
                slot
            )));
        };
        let fence_frame = pending.fence_frame;

        let state = self.recording_state()?;
        self.drain_graveyard(state.safe_frame_number);
        Ok(state.safe_frame_number >= fence_frame)
    }

    fn map_result(&mut self, slot: usize) -> InterceptorResult<(Vec<u8>, u32)> {
        let pending = self.slots[slot].pending.take().ok_or_else(|| {
            InterceptorError::Other(format!("map on slot {} with no pending copy", slot))
        })?;
        let staging = self.slots[slot].staging.as_ref().ok_or_else(|| {
            InterceptorError::Other(format!("slot {} has no staging buffer", slot))
        })?;

        // HOST_COHERENTメモリなのでinvalidateは不要。
        // buffer_row_length=0で記録したためデータはタイトに詰まっている
        let byte_size = pending.desc.byte_size();
        let mut data = vec![0u8; byte_size];
        unsafe {
            std::ptr::copy_nonoverlapping(staging.mapped, data.as_mut_ptr(), byte_size);
        }

        Ok((data, pending.desc.tight_stride()))
    }

    fn release_slot(&mut self, slot: usize) {
        if let Some(pending) = self.slots[slot].pending.take() {
            // in-flight中の放棄: GPUが参照している可能性があるため破棄を遅延
            if let Some(staging) = self.slots[slot].staging.take() {
                self.graveyard.push((staging, pending.fence_frame));
            }
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }
}

impl Drop for VulkanBackendAdapter {
    fn drop(&mut self) {
        // アンロード時: in-flight転送を排出してから全リソースを解放する。
        // デバイスはUnityの所有物なので破棄しない
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        for slot in &mut self.slots {
            slot.pending = None;
            if let Some(staging) = slot.staging.take() {
                unsafe {
                    self.device.unmap_memory(staging.memory);
                    self.device.destroy_buffer(staging.buffer, None);
                    self.device.free_memory(staging.memory, None);
                }
            }
        }

        for (staging, _) in self.graveyard.drain(..) {
            unsafe {
                self.device.unmap_memory(staging.memory);
                self.device.destroy_buffer(staging.buffer, None);
                self.device.free_memory(staging.memory, None);
            }
        }

        let _ = &self.unity;
        let _ = &self.instance;
    }
}
